//! Line-delimited JSON request loop.

use crate::engine::{EngineError, EngineHandle};
use facewise_core::Reply;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// One input line: a frame to recognize, or a control command.
#[derive(Debug, Deserialize)]
struct Request {
    image: Option<String>,
    command: Option<String>,
}

/// Read requests until EOF, writing exactly one reply line per non-blank input line.
pub async fn serve<R, W>(engine: &EngineHandle, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(engine, &line).await;
        output.write_all(reply.to_line().as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    tracing::info!("input closed");
    Ok(())
}

async fn handle_line(engine: &EngineHandle, line: &str) -> Reply {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            tracing::error!(error = %err, "failed to parse JSON input");
            return Reply::error("Invalid JSON input");
        }
    };

    match request {
        Request { image: Some(payload), .. } => match engine.recognize(payload).await {
            Ok(recognition) => recognition.into(),
            Err(err) => failure_reply(err),
        },
        Request { command: Some(command), .. } if command.eq_ignore_ascii_case("reload") => {
            match engine.reload().await {
                Ok(count) => Reply::system(format!("Reloaded {count} known faces")),
                Err(err) => failure_reply(err),
            }
        }
        Request { command: Some(command), .. } => Reply::error(format!("Unknown command: {command}")),
        Request { .. } => Reply::error("Expected an \"image\" or \"command\" field"),
    }
}

fn failure_reply(err: EngineError) -> Reply {
    match &err {
        EngineError::Recognize(inner) => tracing::warn!(error = %inner, "frame rejected"),
        other => tracing::error!(error = %other, "engine failure"),
    }
    Reply::error(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::engine::testing::{png_base64, temp_db, unit, FixedPipeline};
    use facewise_core::{FaceStore, RecognizerConfig};
    use serde_json::Value;
    use std::time::Duration;

    async fn run(engine: &EngineHandle, input: &str) -> Vec<Value> {
        let mut out = Vec::new();
        serve(engine, input.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn engine_with(tag: &str, interval: Duration) -> (EngineHandle, std::path::PathBuf) {
        let db = temp_db(tag);
        let store = FaceStore::open(&db).unwrap();
        store.insert("alice", &unit(0)).unwrap();
        let config = RecognizerConfig { min_interval: interval, ..RecognizerConfig::default() };
        let engine = spawn_engine(FixedPipeline { encoding: unit(0) }, config, db.clone()).unwrap();
        (engine, db)
    }

    #[tokio::test]
    async fn test_recognizes_frame() {
        let (engine, _db) = engine_with("recognize", Duration::ZERO);
        let input = format!("{{\"image\": \"{}\"}}\n", png_base64(32, 32));

        let replies = run(&engine, &input).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["type"], "recognition_result");
        assert_eq!(replies[0]["faces"][0]["name"], "alice");
        assert_eq!(replies[0]["faces"][0]["confidence"], 1.0);
    }

    #[tokio::test]
    async fn test_one_reply_per_line() {
        let (engine, _db) = engine_with("lines", Duration::ZERO);
        let input = "not json\n\n{\"image\": \"bm90IGFuIGltYWdl\"}\n{\"other\": 1}\n{\"command\": \"dance\"}\n";

        let replies = run(&engine, input).await;
        let messages: Vec<&str> = replies.iter().map(|r| r["message"].as_str().unwrap()).collect();
        assert!(replies.iter().all(|r| r["type"] == "error"));
        assert_eq!(
            messages,
            vec![
                "Invalid JSON input",
                "Invalid image data",
                "Expected an \"image\" or \"command\" field",
                "Unknown command: dance",
            ]
        );
    }

    #[tokio::test]
    async fn test_fast_frames_are_rejected() {
        let (engine, _db) = engine_with("rate", Duration::from_secs(60));
        let frame = format!("{{\"image\": \"{}\"}}\n", png_base64(16, 16));
        let input = format!("{frame}{frame}");

        let replies = run(&engine, &input).await;
        assert_eq!(replies[0]["type"], "recognition_result");
        assert_eq!(replies[1]["type"], "error");
        assert_eq!(replies[1]["message"], "Processing too many frames, please slow down");
    }

    #[tokio::test]
    async fn test_empty_database_starts_with_no_known_faces() {
        let db = temp_db("empty");
        std::fs::write(&db, b"").unwrap();
        let config = RecognizerConfig { min_interval: Duration::ZERO, ..RecognizerConfig::default() };
        let engine = spawn_engine(FixedPipeline { encoding: unit(0) }, config, db).unwrap();

        let input = format!("{{\"image\": \"{}\"}}\n{{\"command\": \"reload\"}}\n", png_base64(32, 32));
        let replies = run(&engine, &input).await;
        assert_eq!(replies[0]["type"], "recognition_result");
        assert_eq!(replies[0]["faces"][0]["name"], "Unknown");
        assert_eq!(replies[0]["faces"][0]["confidence"], 0.0);
        assert_eq!(replies[1]["message"], "Reloaded 0 known faces");
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_faces() {
        let (engine, db) = engine_with("reload", Duration::ZERO);
        FaceStore::open(&db).unwrap().insert("bob", &unit(1)).unwrap();

        let replies = run(&engine, "{\"command\": \"reload\"}\n").await;
        assert_eq!(replies[0]["type"], "system");
        assert_eq!(replies[0]["message"], "Reloaded 2 known faces");
    }
}
