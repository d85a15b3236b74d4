use crate::errors::LedgerError;
use crate::types::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message as TungMessage};
use tracing::{debug, warn};

pub fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, LedgerError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| LedgerError::SerializationError(e.to_string()))
}

pub fn decode<T: bincode::Decode<()>>(data: &[u8]) -> Result<T, LedgerError> {
    bincode::decode_from_slice(data, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| LedgerError::SerializationError(e.to_string()))
}

/// Encodes a message and writes it as one binary frame.
///
/// `max_message_size` is checked before anything hits the socket so an oversized
/// envelope fails locally instead of being cut by the remote side.
pub async fn send_message<S>(
    sink: &mut S,
    message: &Message,
    max_message_size: Option<usize>,
) -> Result<(), LedgerError>
where
    S: Sink<TungMessage, Error = tungstenite::Error> + Unpin,
{
    let data = encode(message)?;
    if let Some(limit) = max_message_size {
        if data.len() > limit {
            return Err(LedgerError::MessageTooLarge {
                size: data.len(),
                limit,
            });
        }
    }
    sink.send(TungMessage::Binary(data.into()))
        .await
        .map_err(|e| LedgerError::NetworkError(e.to_string()))
}

/// Reads frames until the next decodable message.
///
/// Returns `None` once the peer closed the stream. Control frames are skipped.
pub async fn next_message<S>(stream: &mut S) -> Option<Result<Message, LedgerError>>
where
    S: Stream<Item = Result<TungMessage, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(TungMessage::Binary(data)) => return Some(decode(&data)),
            Ok(TungMessage::Close(frame)) => {
                debug!("Remote closed the stream: {:?}", frame);
                return None;
            }
            Ok(TungMessage::Text(_)) => warn!("Ignoring unexpected text frame"),
            Ok(_) => continue,
            Err(e) => return Some(Err(LedgerError::NetworkError(e.to_string()))),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Acknowledgment, BroadcastStatus};
    use futures_util::stream;

    #[tokio::test]
    async fn next_message_skips_control_frames_and_stops_on_close() {
        let ack = Message::BroadcastResponse(Acknowledgment::rejected(
            BroadcastStatus::BadRequest,
            "bad envelope",
        ));
        let frames: Vec<Result<TungMessage, tungstenite::Error>> = vec![
            Ok(TungMessage::Ping(vec![1].into())),
            Ok(TungMessage::Binary(encode(&ack).unwrap().into())),
            Ok(TungMessage::Close(None)),
            Ok(TungMessage::Binary(encode(&Message::Subscribed).unwrap().into())),
        ];
        let mut stream = stream::iter(frames);

        assert_eq!(next_message(&mut stream).await, Some(Ok(ack)));
        assert_eq!(next_message(&mut stream).await, None);
    }

    #[tokio::test]
    async fn next_message_reports_garbage_as_serialization_error() {
        let frames: Vec<Result<TungMessage, tungstenite::Error>> =
            vec![Ok(TungMessage::Binary(vec![0xff, 0xff, 0xff].into()))];
        let mut stream = stream::iter(frames);

        assert!(matches!(
            next_message(&mut stream).await,
            Some(Err(LedgerError::SerializationError(_)))
        ));
    }
}
