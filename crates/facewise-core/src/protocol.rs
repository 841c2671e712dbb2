//! Line-delimited JSON messages written to stdout by the Facewise services.

use crate::recognition::{RecognizedFace, Recognition};
use serde::{Deserialize, Serialize};

/// Every outbound message carries a `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    RecognitionResult {
        faces: Vec<RecognizedFace>,
        process_time: f64,
    },
    Response {
        answer: String,
    },
    System {
        message: String,
    },
    Error {
        message: String,
    },
}

impl Reply {
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error { message: message.into() }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Reply::System { message: message.into() }
    }

    pub fn response(answer: impl Into<String>) -> Self {
        Reply::Response { answer: answer.into() }
    }

    /// Serialize as a single line (no trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"unserializable reply"}"#.to_string()
        })
    }
}

impl From<Recognition> for Reply {
    fn from(recognition: Recognition) -> Self {
        Reply::RecognitionResult {
            faces: recognition.faces,
            process_time: recognition.process_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_discriminators() {
        let value = |reply: Reply| serde_json::to_value(reply).unwrap();

        assert_eq!(value(Reply::error("boom")), json!({"type": "error", "message": "boom"}));
        assert_eq!(value(Reply::system("ready")), json!({"type": "system", "message": "ready"}));
        assert_eq!(value(Reply::response("42")), json!({"type": "response", "answer": "42"}));
    }

    #[test]
    fn test_recognition_result_shape() {
        let reply = Reply::from(Recognition {
            faces: vec![RecognizedFace {
                name: "alice".into(),
                confidence: 0.75,
                top: 4, right: 8, bottom: 12, left: 0,
            }],
            process_time: 0.5,
        });
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "recognition_result");
        assert_eq!(value["faces"][0]["name"], "alice");
        assert_eq!(value["faces"][0]["right"], 8);
        assert_eq!(value["process_time"], 0.5);
        assert!(!reply.to_line().contains('\n'));
    }
}
