use etl_dispatch::TopicHandler;
use etl_protocol::{Envelope, HandlerError, MessageStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Payload exchanged on the ping topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// `in-topic` consumer answering every message with a `Completed` pong.
pub struct InTopicPing;

impl TopicHandler for InTopicPing {
    async fn handle(&self, message: Envelope<Value>) -> Result<Option<Envelope<Value>>, HandlerError> {
        let request: Option<MessageContent> = message
            .data
            .clone()
            .map(serde_json::from_value)
            .transpose()?;
        info!(
            received = request.as_ref().map(|r| r.message.as_str()),
            "Logging from in-topic when receiving message"
        );

        let reply = MessageContent {
            message: "pong from subscriber".into(),
            timestamp: Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        };
        Ok(Some(message.reply(serde_json::to_value(reply)?, MessageStatus::Completed)))
    }
}
