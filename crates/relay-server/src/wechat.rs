//! WeChat official-account plumbing: server verification and passive replies.
//!
//! See <https://developers.weixin.qq.com/doc/offiaccount/Message_Management/Passive_user_reply_message.html>.

use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;
use sha1::{Digest, Sha1};

use relay_core::ids::MessageId;

/// Body the platform accepts as "no reply, don't retry".
pub const ACK: &str = "success";

/// Inbound push message. Only the fields the relay reads are modeled.
#[derive(Clone, Debug, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "ToUserName")]
    pub to_user: String,
    #[serde(rename = "FromUserName")]
    pub from_user: String,
    #[serde(rename = "CreateTime", default)]
    pub create_time: i64,
    #[serde(rename = "MsgType")]
    pub msg_type: String,
    #[serde(rename = "Content", default)]
    pub content: Option<String>,
    #[serde(rename = "MsgId", default)]
    pub msg_id: Option<i64>,
}

impl InboundMessage {
    pub fn parse(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }

    pub fn is_text(&self) -> bool {
        self.msg_type == "text"
    }

    /// Id and content of a text message; `None` for anything else.
    pub fn text(&self) -> Option<(MessageId, &str)> {
        if !self.is_text() {
            return None;
        }
        let id = self.msg_id?;
        let content = self.content.as_deref()?;
        Some((MessageId::from(id), content))
    }
}

/// Passive text reply to `inbound`, sender and receiver swapped.
pub fn text_reply(inbound: &InboundMessage, content: &str, now: i64) -> Result<String, quick_xml::Error> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Start(BytesStart::new("xml")))?;
    write_cdata_element(&mut writer, "ToUserName", &inbound.from_user)?;
    write_cdata_element(&mut writer, "FromUserName", &inbound.to_user)?;
    writer.write_event(Event::Start(BytesStart::new("CreateTime")))?;
    writer.write_event(Event::Text(BytesText::new(&now.to_string())))?;
    writer.write_event(Event::End(BytesEnd::new("CreateTime")))?;
    write_cdata_element(&mut writer, "MsgType", "text")?;
    write_cdata_element(&mut writer, "Content", content)?;
    writer.write_event(Event::End(BytesEnd::new("xml")))?;
    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

fn write_cdata_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    text: &str,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    // Splits around any "]]>" in the text.
    for part in BytesCData::escaped(text) {
        writer.write_event(Event::CData(part))?;
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Hex SHA-1 over the sorted concatenation of token, timestamp and nonce.
pub fn signature(token: &str, timestamp: &str, nonce: &str) -> String {
    let mut parts = [token, timestamp, nonce];
    parts.sort_unstable();
    let digest = Sha1::digest(parts.concat().as_bytes());
    format!("{digest:x}")
}

pub fn check_signature(signature_hex: &str, timestamp: &str, nonce: &str, token: &str) -> bool {
    !signature_hex.is_empty() && signature(token, timestamp, nonce).eq_ignore_ascii_case(signature_hex)
}
