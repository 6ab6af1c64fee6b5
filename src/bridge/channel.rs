use std::sync::Arc;

use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;

use crate::errors::ClientError;

/// Outgoing half of a bidirectional message channel.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: Value) -> Result<(), ClientError>;
}

pub type FrameStream = BoxStream<'static, Value>;

/// One side of a channel: what it writes and what it reads.
pub struct Endpoint {
    pub sink: Arc<dyn FrameSink>,
    pub stream: FrameStream,
}

struct MpscSink(mpsc::UnboundedSender<Value>);

impl FrameSink for MpscSink {
    fn send(&self, frame: Value) -> Result<(), ClientError> {
        self.0.unbounded_send(frame).map_err(|_| ClientError::ChannelClosed)
    }
}

/// Two connected in-memory endpoints. Whatever one side sends, the other receives.
pub fn channel_pair() -> (Endpoint, Endpoint) {
    let (a_tx, a_rx) = mpsc::unbounded();
    let (b_tx, b_rx) = mpsc::unbounded();

    let a = Endpoint {
        sink: Arc::new(MpscSink(a_tx)),
        stream: b_rx.boxed(),
    };
    let b = Endpoint {
        sink: Arc::new(MpscSink(b_tx)),
        stream: a_rx.boxed(),
    };
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn pair_is_crossed() {
        let (mut a, mut b) = channel_pair();
        a.sink.send(json!(1)).unwrap();
        b.sink.send(json!(2)).unwrap();
        assert_eq!(b.stream.next().await, Some(json!(1)));
        assert_eq!(a.stream.next().await, Some(json!(2)));

        drop(b);
        assert!(matches!(a.sink.send(json!(3)), Err(ClientError::ChannelClosed)));
    }
}
