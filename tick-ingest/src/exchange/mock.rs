//! Mock feed transport for testing
//!
//! Each `connect` call consumes the next scripted [`MockSession`]. Once the
//! script runs out, connections succeed and stay open without sending anything.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::errors::FeedError;
use super::transport::{FeedConnection, FeedFrame, FeedTransport};

/// One scripted step of a mock connection
#[derive(Debug, Clone)]
pub enum MockEvent {
    /// Deliver a text frame
    Text(String),
    /// Deliver a server ping
    Ping,
    /// Deliver a close frame
    Close,
    /// Fail the read with a transport error
    Error(String),
    /// Stay silent for a while before the next step
    Delay(Duration),
}

/// Script for a single connection attempt
#[derive(Debug, Clone)]
pub enum MockSession {
    /// The connect call fails
    Refuse(String),
    /// The connect call succeeds and replays the events
    Stream {
        events: Vec<MockEvent>,
        /// Keep the connection open and silent after the last event
        hold_open: bool,
    },
}

impl MockSession {
    /// Session that sends the given text frames, then ends the stream
    pub fn frames<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MockSession::Stream {
            events: frames.into_iter().map(|f| MockEvent::Text(f.into())).collect(),
            hold_open: false,
        }
    }

    /// Session that replays arbitrary events, then ends the stream
    pub fn events(events: Vec<MockEvent>) -> Self {
        MockSession::Stream {
            events,
            hold_open: false,
        }
    }

    pub fn refuse(reason: impl Into<String>) -> Self {
        MockSession::Refuse(reason.into())
    }

    /// Keep the connection open once the events are exhausted
    pub fn then_hold(self) -> Self {
        match self {
            MockSession::Stream { events, .. } => MockSession::Stream {
                events,
                hold_open: true,
            },
            refuse => refuse,
        }
    }
}

/// What the connector did against the mock
#[derive(Debug, Default, Clone)]
pub struct MockActivity {
    /// URL of every connect attempt, refused ones included
    pub connects: Vec<String>,
    pub pings_sent: usize,
    pub pongs_sent: usize,
    pub closes_sent: usize,
}

/// Scripted feed transport
#[derive(Default)]
pub struct MockFeedTransport {
    sessions: Mutex<VecDeque<MockSession>>,
    activity: Arc<Mutex<MockActivity>>,
}

impl MockFeedTransport {
    pub fn new(sessions: Vec<MockSession>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            activity: Arc::new(Mutex::new(MockActivity::default())),
        }
    }

    /// Queue another session behind the existing script
    pub fn push_session(&self, session: MockSession) {
        self.sessions.lock().push_back(session);
    }

    pub fn activity(&self) -> MockActivity {
        self.activity.lock().clone()
    }
}

#[async_trait]
impl FeedTransport for MockFeedTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedConnection>, FeedError> {
        self.activity.lock().connects.push(url.to_string());

        let session = self.sessions.lock().pop_front();
        match session {
            Some(MockSession::Refuse(reason)) => Err(FeedError::Connection(reason)),
            Some(MockSession::Stream { events, hold_open }) => Ok(Box::new(MockConnection {
                events: events.into(),
                hold_open,
                activity: Arc::clone(&self.activity),
            })),
            None => Ok(Box::new(MockConnection {
                events: VecDeque::new(),
                hold_open: true,
                activity: Arc::clone(&self.activity),
            })),
        }
    }
}

struct MockConnection {
    events: VecDeque<MockEvent>,
    hold_open: bool,
    activity: Arc<Mutex<MockActivity>>,
}

#[async_trait]
impl FeedConnection for MockConnection {
    async fn next_frame(&mut self) -> Option<Result<FeedFrame, FeedError>> {
        loop {
            // Delays are popped only after they elapse so a cancelled read replays them
            if let Some(MockEvent::Delay(delay)) = self.events.front() {
                let delay = *delay;
                tokio::time::sleep(delay).await;
                self.events.pop_front();
                continue;
            }

            return match self.events.pop_front() {
                Some(MockEvent::Text(text)) => Some(Ok(FeedFrame::Text(text))),
                Some(MockEvent::Ping) => Some(Ok(FeedFrame::Ping(b"mock".to_vec()))),
                Some(MockEvent::Close) => Some(Ok(FeedFrame::Close(None))),
                Some(MockEvent::Error(reason)) => Some(Err(FeedError::WebSocket(reason))),
                Some(MockEvent::Delay(_)) => continue,
                None if self.hold_open => std::future::pending().await,
                None => None,
            };
        }
    }

    async fn send_ping(&mut self, _payload: Vec<u8>) -> Result<(), FeedError> {
        self.activity.lock().pings_sent += 1;
        Ok(())
    }

    async fn send_pong(&mut self, _payload: Vec<u8>) -> Result<(), FeedError> {
        self.activity.lock().pongs_sent += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FeedError> {
        self.activity.lock().closes_sent += 1;
        Ok(())
    }
}
