use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;

use chorus_core::errors::GatewayError;
use chorus_core::ids::ParticipantId;
use chorus_core::provider::{ByteStream, PersonaClient, PersonaRequest, ScheduleRequest, Scheduler};

/// One step of a scripted response body.
#[derive(Clone, Debug)]
pub enum MockChunk {
    /// Raw bytes delivered as one read.
    Bytes(Bytes),
    /// Sleep before the next step.
    Pause(Duration),
    /// Fail the read with this error.
    Fail(GatewayError),
    /// Never yield again.
    Stall,
}

impl MockChunk {
    /// A well-formed content frame.
    pub fn frame(text: &str) -> Self {
        let line = format!("data: {}\n", serde_json::json!({ "content": text }));
        Self::Bytes(Bytes::from(line))
    }

    pub fn raw(data: &str) -> Self {
        Self::Bytes(Bytes::from(data.to_string()))
    }
}

/// Pre-programmed persona responses for deterministic testing without a backend.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Stream the given chunks, then end.
    Stream(Vec<MockChunk>),
    /// Fail the `open` call itself.
    Error(GatewayError),
    /// Wait a duration, then resolve the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    /// A stream of content frames, one read per fragment.
    pub fn frames(fragments: &[&str]) -> Self {
        Self::Stream(fragments.iter().map(|f| MockChunk::frame(f)).collect())
    }

    /// Content frames followed by silence.
    pub fn frames_then_stall(fragments: &[&str]) -> Self {
        let mut chunks: Vec<MockChunk> = fragments.iter().map(|f| MockChunk::frame(f)).collect();
        chunks.push(MockChunk::Stall);
        Self::Stream(chunks)
    }

    /// Content frames followed by a transport failure.
    pub fn frames_then_fail(fragments: &[&str], error: GatewayError) -> Self {
        let mut chunks: Vec<MockChunk> = fragments.iter().map(|f| MockChunk::frame(f)).collect();
        chunks.push(MockChunk::Fail(error));
        Self::Stream(chunks)
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Persona client that answers calls from a script, in call order.
#[derive(Default)]
pub struct MockPersonaClient {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<PersonaRequest>>,
}

impl MockPersonaClient {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<PersonaRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PersonaClient for MockPersonaClient {
    async fn open(&self, request: &PersonaRequest) -> Result<ByteStream, GatewayError> {
        self.requests.lock().push(request.clone());
        let reply = self.replies.lock().pop_front().ok_or_else(|| {
            GatewayError::InvalidRequest(format!(
                "MockPersonaClient: no reply configured for {}",
                request.ai_name
            ))
        })?;

        let mut current = reply;
        loop {
            match current {
                MockReply::Stream(chunks) => return Ok(chunk_stream(chunks)),
                MockReply::Error(e) => return Err(e),
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

fn chunk_stream(chunks: Vec<MockChunk>) -> ByteStream {
    Box::pin(stream::unfold(chunks.into_iter(), |mut chunks| async move {
        loop {
            match chunks.next()? {
                MockChunk::Bytes(bytes) => return Some((Ok(bytes), chunks)),
                MockChunk::Pause(duration) => tokio::time::sleep(duration).await,
                MockChunk::Fail(error) => return Some((Err(error), chunks)),
                MockChunk::Stall => futures::future::pending::<()>().await,
            }
        }
    }))
}

/// Scheduler that answers from a script, in call order.
#[derive(Default)]
pub struct MockScheduler {
    answers: Mutex<VecDeque<Result<Vec<ParticipantId>, GatewayError>>>,
    requests: Mutex<Vec<ScheduleRequest>>,
}

impl MockScheduler {
    pub fn new(answers: Vec<Result<Vec<ParticipantId>, GatewayError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always-available single answer.
    pub fn selecting(ids: &[&str]) -> Self {
        Self::new(vec![Ok(ids.iter().map(|id| ParticipantId::from(*id)).collect())])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ScheduleRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Scheduler for MockScheduler {
    async fn select(&self, request: &ScheduleRequest) -> Result<Vec<ParticipantId>, GatewayError> {
        self.requests.lock().push(request.clone());
        self.answers.lock().pop_front().unwrap_or_else(|| {
            Err(GatewayError::InvalidRequest(
                "MockScheduler: no answer configured".into(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::roster::{Group, Persona};
    use tokio_stream::StreamExt;

    fn request(name: &str) -> PersonaRequest {
        let group = Group {
            id: "g".into(),
            name: "G".into(),
            description: None,
            members: vec![],
            all_respond: false,
        };
        PersonaRequest::new(&Persona::new(1, name, "m"), &group, "hi", vec![], 0)
    }

    #[tokio::test]
    async fn frames_reply_streams_each_fragment() {
        let mock = MockPersonaClient::new(vec![MockReply::frames(&["a", "b"])]);
        let mut stream = mock.open(&request("Alice")).await.unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks.len(), 2);
        assert_eq!(&chunks[0][..], b"data: {\"content\":\"a\"}\n");
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.requests()[0].ai_name, "Alice");
    }

    #[tokio::test]
    async fn fail_chunk_surfaces_error() {
        let mock = MockPersonaClient::new(vec![MockReply::frames_then_fail(
            &["x"],
            GatewayError::StreamInterrupted("reset".into()),
        )]);
        let mut stream = mock.open(&request("Bob")).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(
            stream.next().await,
            Some(Err(GatewayError::StreamInterrupted(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn exhausted_script_is_an_error() {
        let mock = MockPersonaClient::new(vec![]);
        assert!(mock.open(&request("Alice")).await.is_err());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_reply_waits() {
        let mock = MockPersonaClient::new(vec![MockReply::delayed(
            Duration::from_secs(3),
            MockReply::frames(&["late"]),
        )]);
        let start = tokio::time::Instant::now();
        let _stream = mock.open(&request("Alice")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn scheduler_script_in_order() {
        let scheduler = MockScheduler::new(vec![
            Ok(vec![ParticipantId::from("2")]),
            Err(GatewayError::NetworkError("down".into())),
        ]);
        let req = ScheduleRequest {
            message: "hi".into(),
            history: vec![],
            available: vec![],
        };
        assert_eq!(scheduler.select(&req).await.unwrap(), vec![ParticipantId::from("2")]);
        assert!(scheduler.select(&req).await.is_err());
        assert!(scheduler.select(&req).await.is_err());
        assert_eq!(scheduler.call_count(), 3);
    }
}
