//! Session fixtures and wait helpers.

use common::secret::SecretString;
use common::types::{ConsultationId, ParticipantId};
use consult_session::config::SessionConfig;
use consult_session::media::MediaConfig;
use consult_session::session::{SessionDeps, SessionHandle, SessionIdentity};
use consult_session::state::SessionState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{FakeCapture, FakeEngine, FakeMessageStore};

/// Local participant id used by [`test_identity`].
pub const LOCAL_PARTICIPANT_ID: &str = "1001";

/// Local display name used by [`test_identity`].
pub const LOCAL_DISPLAY_NAME: &str = "Dr. Test";

/// Engine channel used by [`test_identity`].
pub const TEST_CHANNEL: &str = "consult-test-channel";

/// Engine join token used by [`test_identity`].
pub const TEST_AUTH_TOKEN: &str = "test-engine-token-secret";

/// How long wait helpers wait before failing the test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity of the local fixture participant.
pub fn test_identity() -> SessionIdentity {
    SessionIdentity {
        consultation_id: ConsultationId::new(format!("consult-{}", uuid::Uuid::new_v4())),
        engine_app_id: "test-app".to_string(),
        channel_name: TEST_CHANNEL.to_string(),
        auth_token: SecretString::from(TEST_AUTH_TOKEN),
        local_participant_id: ParticipantId::new(LOCAL_PARTICIPANT_ID),
        local_display_name: LOCAL_DISPLAY_NAME.to_string(),
    }
}

/// Config with a short chat poll interval.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        chat_poll_interval: Duration::from_millis(100),
        teardown_task_timeout: Duration::from_secs(1),
        ..SessionConfig::default()
    }
}

/// A session wired to fresh fakes.
pub struct TestSession {
    /// Public handle.
    pub handle: SessionHandle,
    /// Actor task.
    pub join: JoinHandle<()>,
    /// Engine fake (shared with the session).
    pub engine: FakeEngine,
    /// Capture fake (shared with the session).
    pub capture: Arc<FakeCapture>,
    /// Message store fake (shared with the session).
    pub messages: Arc<FakeMessageStore>,
}

impl TestSession {
    /// Spawn a session in `Idle` with [`test_config`].
    pub fn spawn() -> Self {
        Self::builder().spawn()
    }

    /// Start building a session with custom fakes or config.
    pub fn builder() -> TestSessionBuilder {
        TestSessionBuilder::default()
    }

    /// Start with default media and assert the session reaches `Connected`.
    pub async fn start_connected(&self) {
        self.handle
            .start(MediaConfig::default())
            .await
            .expect("session should start");
        assert_eq!(self.handle.state(), SessionState::Connected);
    }

    /// Leave and wait for the actor task to exit once every handle is gone.
    pub async fn leave_and_join(self) {
        self.handle.leave().await.expect("leave should succeed");
        drop(self.handle);
        tokio::time::timeout(WAIT_TIMEOUT, self.join)
            .await
            .expect("actor should exit")
            .expect("actor should not panic");
    }
}

/// Builder for [`TestSession`].
#[derive(Default)]
pub struct TestSessionBuilder {
    engine: Option<FakeEngine>,
    capture: Option<Arc<FakeCapture>>,
    messages: Option<Arc<FakeMessageStore>>,
    config: Option<SessionConfig>,
}

impl TestSessionBuilder {
    /// Use this engine fake.
    pub fn with_engine(mut self, engine: FakeEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Use this capture fake.
    pub fn with_capture(mut self, capture: Arc<FakeCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Use this message store fake.
    pub fn with_messages(mut self, messages: Arc<FakeMessageStore>) -> Self {
        self.messages = Some(messages);
        self
    }

    /// Use this config.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Spawn the session.
    pub fn spawn(self) -> TestSession {
        let engine = self.engine.unwrap_or_default();
        let capture = self.capture.unwrap_or_else(FakeCapture::new);
        let messages = self.messages.unwrap_or_else(FakeMessageStore::new);

        let deps = SessionDeps {
            engine: Arc::new(engine.clone()),
            capture: capture.clone(),
            messages: messages.clone(),
        };
        let (handle, join) = SessionHandle::spawn(
            test_identity(),
            deps,
            self.config.unwrap_or_else(test_config),
        );

        TestSession {
            handle,
            join,
            engine,
            capture,
            messages,
        }
    }
}

/// Wait until the watched value satisfies `pred` and return a copy of it.
///
/// Panics after [`WAIT_TIMEOUT`].
pub async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, pred: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for watched value")
        .expect("watch sender dropped")
        .clone()
}

/// Poll `cond` until it holds, yielding to other tasks in between.
///
/// Panics after [`WAIT_TIMEOUT`].
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Install a test-writer tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
