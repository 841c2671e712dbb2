//! Line-delimited JSON query loop.

use crate::service::ChatRag;
use facewise_core::Reply;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    query: Option<String>,
}

/// Answer queries until EOF, one reply line per non-blank input line.
pub async fn serve<R, W>(rag: &mut ChatRag, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(rag, &line).await;
        write_reply(&mut output, &reply).await?;
    }
    tracing::info!("input closed");
    Ok(())
}

pub async fn write_reply<W: AsyncWrite + Unpin>(output: &mut W, reply: &Reply) -> std::io::Result<()> {
    output.write_all(reply.to_line().as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}

async fn handle_line(rag: &mut ChatRag, line: &str) -> Reply {
    match serde_json::from_str::<Request>(line) {
        Ok(Request { query: Some(query) }) if !query.trim().is_empty() => rag.handle(&query).await,
        Ok(_) => Reply::response("Please provide a query to proceed."),
        Err(err) => {
            tracing::error!(error = %err, "failed to parse JSON input");
            Reply::response("Invalid input format. Please try again.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatModel, Embedder, LlmError};
    use async_trait::async_trait;
    use serde_json::Value;

    struct Echo;

    #[async_trait]
    impl Embedder for Echo {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            Ok(vec![text.len() as f32])
        }
    }

    #[async_trait]
    impl ChatModel for Echo {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok("answer".into())
        }
    }

    async fn run(rag: &mut ChatRag, input: &str) -> Vec<Value> {
        let mut out = Vec::new();
        serve(rag, input.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_input_validation() {
        let mut rag = ChatRag::new("/nonexistent.db", Box::new(Echo), Box::new(Echo), 3);
        let replies = run(&mut rag, "oops\n\n{\"query\": \"  \"}\n{}\n{\"query\": \"hi\"}\n").await;

        let answers: Vec<&str> = replies.iter().map(|r| r["answer"].as_str().unwrap()).collect();
        assert!(replies.iter().all(|r| r["type"] == "response"));
        assert_eq!(
            answers,
            vec![
                "Invalid input format. Please try again.",
                "Please provide a query to proceed.",
                "Please provide a query to proceed.",
                crate::service::NO_DATA_ANSWER,
            ]
        );
    }

    #[tokio::test]
    async fn test_answers_with_data() {
        let mut rag = ChatRag::new("/nonexistent.db", Box::new(Echo), Box::new(Echo), 3);
        let faces = vec![facewise_core::FaceSummary {
            id: 1,
            name: "Alice".into(),
            timestamp: "2024-01-01 00:00:00".into(),
        }];
        rag.load_faces(&faces).await;

        let replies = run(&mut rag, "{\"query\": \"who is here?\"}\n").await;
        assert_eq!(replies[0]["answer"], "answer");
    }
}
