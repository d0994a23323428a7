//! Serving side of a session
//!
//! Inbound requests are handed to a [`MessageReceiverHandler`] together with
//! a [`Responder`] bound to the session they arrived on. The responder
//! writes replies whose `response_id` is the inbound `request_id`.
//! [`CommandDispatcher`] is the stock handler: it maps command names to
//! [`CommandExecutor`]s and turns executor errors into failure replies.

use crate::message::{Body, Command, Envelope, RemoteFailure};
use crate::transports::{EnvelopeHandler, SessionWriter};
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Failure kind for a command name nobody registered
pub const UNKNOWN_COMMAND: &str = "unknown_command";
/// Failure kind for a request whose body is not a command
pub const NOT_A_COMMAND: &str = "not_a_command";
/// Failure kind for errors raised by an executor
pub const EXECUTION_FAILED: &str = "execution_failed";

/// Writes the reply to one inbound request
pub struct Responder {
    session: SessionWriter,
    request: Envelope,
}

impl Responder {
    pub fn new(session: SessionWriter, request: &Envelope) -> Self {
        // Keep the addressing header only
        let mut header = request.clone();
        header.body = Body::Empty;
        Self {
            session,
            request: header,
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request.request_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.request.conversation_id
    }

    pub async fn respond(&self, body: Body) -> Result<()> {
        self.session.write(&self.request.reply(body)).await
    }

    pub async fn respond_error(&self, failure: RemoteFailure) -> Result<()> {
        self.session.write(&self.request.failure_reply(failure)).await
    }
}

/// Handles requests arriving on an acceptor's sessions
#[async_trait]
pub trait MessageReceiverHandler: Send + Sync {
    async fn message_received(&self, responder: Responder, envelope: Envelope);

    /// A session failed while serving
    async fn exception_received(&self, session: &SessionWriter, cause: &str) {
        warn!(session = session.session_id(), peer = %session.peer(), cause, "Receiver exception");
    }
}

/// Adapts a [`MessageReceiverHandler`] to the transport's handler contract
///
/// Every request is served on its own task so a slow command never holds up
/// the session's reader.
pub struct ReceiverAdapter {
    handler: Arc<dyn MessageReceiverHandler>,
}

impl ReceiverAdapter {
    pub fn new(handler: Arc<dyn MessageReceiverHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl EnvelopeHandler for ReceiverAdapter {
    async fn envelope_received(&self, session: SessionWriter, envelope: Envelope) {
        if envelope.is_reply() {
            debug!(response_id = envelope.response_id, "Ignoring reply on serving session");
            return;
        }

        let handler = self.handler.clone();
        tokio::spawn(async move {
            let responder = Responder::new(session, &envelope);
            handler.message_received(responder, envelope).await;
        });
    }

    async fn session_opened(&self, session: &SessionWriter) {
        debug!(session = session.session_id(), peer = %session.peer(), "Client session opened");
    }

    async fn session_idle(&self, session: &SessionWriter) {
        debug!(session = session.session_id(), peer = %session.peer(), "Client session idle");
    }

    async fn session_error(&self, session: &SessionWriter, cause: &str) {
        self.handler.exception_received(session, cause).await;
    }

    async fn session_closed(&self, session: &SessionWriter) {
        debug!(session = session.session_id(), peer = %session.peer(), "Client session closed");
    }
}

/// Executes one named command
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: Command) -> anyhow::Result<Body>;
}

/// Synchronous closure executor
struct FnExecutor<F>(F);

#[async_trait]
impl<F> CommandExecutor for FnExecutor<F>
where
    F: Fn(Command) -> anyhow::Result<Body> + Send + Sync,
{
    async fn execute(&self, command: Command) -> anyhow::Result<Body> {
        (self.0)(command)
    }
}

/// Routes commands to executors by name
#[derive(Default)]
pub struct CommandDispatcher {
    executors: DashMap<String, Arc<dyn CommandExecutor>>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, executor: Arc<dyn CommandExecutor>) {
        self.executors.insert(name.into(), executor);
    }

    /// Register a synchronous closure
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Command) -> anyhow::Result<Body> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnExecutor(f)));
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Run `command`, mapping every problem to a failure
    pub async fn execute(&self, command: Command) -> std::result::Result<Body, RemoteFailure> {
        let executor = self
            .executors
            .get(&command.name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RemoteFailure::new(UNKNOWN_COMMAND, command.name.clone()))?;

        let name = command.name.clone();
        executor.execute(command).await.map_err(|e| {
            error!(command = %name, error = %e, "Command failed");
            RemoteFailure::from_error(EXECUTION_FAILED, &e)
        })
    }
}

#[async_trait]
impl MessageReceiverHandler for CommandDispatcher {
    async fn message_received(&self, responder: Responder, envelope: Envelope) {
        let outcome = match envelope.body {
            Body::Command(command) => {
                debug!(command = %command.name, request_id = responder.request_id(), "Executing command");
                self.execute(command).await
            }
            other => Err(RemoteFailure::new(
                NOT_A_COMMAND,
                format!("expected a command, found {}", other.kind()),
            )),
        };

        let written = match outcome {
            Ok(body) => responder.respond(body).await,
            Err(failure) => responder.respond_error(failure).await,
        };
        if let Err(e) = written {
            warn!(request_id = responder.request_id(), error = %e, "Failed to write reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::EnvelopeWriter;
    use anyhow::bail;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<Envelope>>);

    #[async_trait]
    impl EnvelopeWriter for Recording {
        async fn write(&self, envelope: &Envelope) -> Result<()> {
            self.0.lock().push(envelope.clone());
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        fn is_open(&self) -> bool {
            true
        }
        fn session_id(&self) -> u64 {
            1
        }
        fn peer(&self) -> String {
            "recording".to_string()
        }
    }

    fn dispatcher() -> CommandDispatcher {
        let dispatcher = CommandDispatcher::new();
        dispatcher.register_fn("Math.double", |cmd| {
            let value: u32 = cmd.arg(0)?;
            Ok(Body::encode(&(value * 2))?)
        });
        dispatcher.register_fn("Always.fail", |_| bail!("nope"));
        dispatcher
    }

    async fn serve(dispatcher: &CommandDispatcher, body: Body) -> Envelope {
        let session = Arc::new(Recording::default());
        let mut request = Envelope::new(body);
        request.request_id = 11;
        request.sender_id = "client".to_string();
        request.recipient_id = "node".to_string();

        let responder = Responder::new(session.clone(), &request);
        dispatcher.message_received(responder, request).await;

        let mut written = session.0.lock();
        assert_eq!(written.len(), 1);
        written.remove(0)
    }

    #[tokio::test]
    async fn test_command_reply_carries_request_id() {
        let command = Command::new("Math.double").with_arg(&21u32).unwrap();
        let reply = serve(&dispatcher(), Body::Command(command)).await;

        assert_eq!(reply.response_id, 11);
        assert_eq!(reply.recipient_id, "client");
        assert_eq!(reply.body.decode::<u32>().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_unknown_command_replies_failure() {
        let reply = serve(&dispatcher(), Body::Command(Command::new("Nope.nothing"))).await;
        match reply.body {
            Body::Failure(failure) => {
                assert_eq!(failure.kind, UNKNOWN_COMMAND);
                assert_eq!(failure.message, "Nope.nothing");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_executor_error_and_non_command() {
        let failed = serve(&dispatcher(), Body::Command(Command::new("Always.fail"))).await;
        assert!(matches!(failed.body, Body::Failure(ref f) if f.kind == EXECUTION_FAILED && f.message == "nope"));

        let rejected = serve(&dispatcher(), Body::Bytes(vec![1])).await;
        assert!(matches!(rejected.body, Body::Failure(ref f) if f.kind == NOT_A_COMMAND));
    }

    #[tokio::test]
    async fn test_session_errors_reach_receiver_handler() {
        #[derive(Default)]
        struct Exceptions(Mutex<Vec<String>>);

        #[async_trait]
        impl MessageReceiverHandler for Exceptions {
            async fn message_received(&self, _responder: Responder, _envelope: Envelope) {}

            async fn exception_received(&self, _session: &SessionWriter, cause: &str) {
                self.0.lock().push(cause.to_string());
            }
        }

        let exceptions = Arc::new(Exceptions::default());
        let adapter = ReceiverAdapter::new(exceptions.clone());
        let session: SessionWriter = Arc::new(Recording::default());

        adapter.session_error(&session, "bad frame").await;
        assert_eq!(*exceptions.0.lock(), vec!["bad frame".to_string()]);
    }

    #[test]
    fn test_names_sorted() {
        assert_eq!(dispatcher().names(), vec!["Always.fail", "Math.double"]);
    }
}
