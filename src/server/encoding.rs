use crate::config::StreamFormat;
use crate::llm::chat::BoxError;
use crate::proxy::{ RelayStream, StreamOutcome };
use axum::body::{ Body, Bytes };
use axum::http::{ header, HeaderValue };
use axum::response::Response;
use futures::{ future, stream, Stream, StreamExt };

pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";

const ERROR_MESSAGE: &str = "An error occurred.";

pub fn start_part(message_id: &str) -> String {
    format!("f:{}\n", serde_json::json!({ "messageId": message_id }))
}

pub fn text_part(chunk: &str) -> String {
    format!("0:{}\n", serde_json::Value::String(chunk.to_owned()))
}

pub fn finish_part() -> String {
    format!("d:{}\n", serde_json::json!({ "finishReason": "stop" }))
}

pub fn error_part() -> String {
    format!("3:{}\n", serde_json::Value::String(ERROR_MESSAGE.to_owned()))
}

/// Wraps the relay into a streamed `200` response in the configured format.
pub fn stream_response(relay: RelayStream, format: StreamFormat, message_id: &str) -> Response {
    let body = match format {
        StreamFormat::Text => Body::from_stream(relay.map(|item| item.map(Bytes::from))),
        StreamFormat::Data => Body::from_stream(data_stream(relay, message_id.to_string())),
    };

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if format == StreamFormat::Data {
        headers.insert(DATA_STREAM_HEADER, HeaderValue::from_static("v1"));
    }
    response
}

/// A failed relay ends with an error part instead of breaking the body, so
/// the client can tell a failure from a dropped connection.
fn data_stream(
    relay: RelayStream,
    message_id: String
) -> impl Stream<Item = Result<Bytes, BoxError>> + Send {
    let start = stream::once(future::ready(Ok::<Bytes, BoxError>(Bytes::from(start_part(&message_id)))));

    let parts = stream::unfold(Some(relay), |state| async move {
        let mut relay = state?;
        let part = match relay.next().await {
            Some(Ok(chunk)) => {
                return Some((Ok::<Bytes, BoxError>(Bytes::from(text_part(&chunk))), Some(relay)));
            }
            Some(Err(_)) => error_part(),
            None if relay.outcome() == Some(StreamOutcome::Completed) => finish_part(),
            None => {
                return None;
            }
        };
        Some((Ok(Bytes::from(part)), None))
    });

    start.chain(parts)
}
