//! Async driver for [`ChatController`].
//!
//! The session runs in a dedicated tokio task that exclusively owns the
//! controller.  The view talks to it through typed command and notification
//! channels; backend calls run in a [`JoinSet`] and report back as
//! completions.  Switching or closing a conversation aborts the set and drops
//! the change-feed subscription before anything new is requested.

use std::ops::ControlFlow;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use potato_shared::{ChangeEvent, ConversationId, MessageId};

use crate::backend::{BackendError, ChatBackend, Subscription};
use crate::config::ClientConfig;
use crate::controller::{ChatController, Completion, Effect, RequestTag, TranscriptSnapshot};
use crate::events::ViewEvent;
use crate::viewport::ScrollMetrics;

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

/// Commands sent *into* the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Open a conversation, replacing the current one.
    Open(ConversationId),
    Close,
    SetInput(String),
    /// Send the composed input.
    Submit,
    BeginEdit(MessageId),
    SetEditDraft(String),
    SubmitEdit,
    CancelEdit,
    Delete(MessageId),
    Scrolled(ScrollMetrics),
    /// New content height after prepended history was laid out.
    ContentResized(f64),
    /// Request a render snapshot of the open conversation.
    Snapshot(oneshot::Sender<TranscriptSnapshot>),
    Shutdown,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Chat session has shut down")]
    Closed,
}

/// Cloneable sender side of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.tx.send(command).await.map_err(|_| SessionError::Closed)
    }

    pub async fn open(&self, conversation_id: ConversationId) -> Result<(), SessionError> {
        self.send(SessionCommand::Open(conversation_id)).await
    }

    pub async fn close(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Close).await
    }

    pub async fn set_input(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::SetInput(text.into())).await
    }

    pub async fn submit(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Submit).await
    }

    pub async fn scrolled(&self, metrics: ScrollMetrics) -> Result<(), SessionError> {
        self.send(SessionCommand::Scrolled(metrics)).await
    }

    pub async fn snapshot(&self) -> Result<TranscriptSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

/// What a backend task reports back.
enum TaskOutput {
    Subscribed {
        tag: RequestTag,
        result: Result<Subscription, BackendError>,
    },
    Completed(Completion),
}

enum Step {
    Command(Option<SessionCommand>),
    Task(Result<TaskOutput, JoinError>),
    Change(RequestTag, Option<ChangeEvent>),
}

/// Spawn a session for the backend's current user.
///
/// Returns the command handle and the receiver of [`ViewEvent`]s.  Must be
/// called from within a tokio runtime.
pub fn spawn_session<B>(
    backend: Arc<B>,
    config: ClientConfig,
) -> (SessionHandle, mpsc::Receiver<ViewEvent>)
where
    B: ChatBackend + ?Sized,
{
    let controller = ChatController::new(backend.current_user_id(), config);
    let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<ViewEvent>(256);

    info!(user = %controller.me(), "Chat session started");
    tokio::spawn(run_session(backend, controller, cmd_rx, notif_tx));

    (SessionHandle { tx: cmd_tx }, notif_rx)
}

async fn run_session<B>(
    backend: Arc<B>,
    mut controller: ChatController,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    notif_tx: mpsc::Sender<ViewEvent>,
) where
    B: ChatBackend + ?Sized,
{
    let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
    let mut feed: Option<(RequestTag, Subscription)> = None;

    loop {
        let step = tokio::select! {
            cmd = cmd_rx.recv() => Step::Command(cmd),
            Some(joined) = tasks.join_next() => Step::Task(joined),
            (tag, event) = next_change(&mut feed) => Step::Change(tag, event),
        };

        match step {
            Step::Command(None) => {
                info!("Command channel closed, shutting down session");
                break;
            }
            Step::Command(Some(cmd)) => {
                let flow = handle_command(&backend, &mut controller, &mut tasks, &mut feed, cmd);
                if flow.is_break() {
                    info!("Session shutdown requested");
                    break;
                }
            }
            Step::Task(Ok(TaskOutput::Completed(completion))) => controller.apply(completion),
            Step::Task(Ok(TaskOutput::Subscribed { tag, result })) => match result {
                Ok(subscription) if controller.is_current(&tag) => {
                    debug!(conversation = %tag.conversation_id, "Change feed attached");
                    feed = Some((tag, subscription));
                }
                Ok(_) => debug!(conversation = %tag.conversation_id, "Dropping stale subscription"),
                Err(e) => warn!(
                    conversation = %tag.conversation_id,
                    error = %e,
                    "Failed to subscribe to change feed"
                ),
            },
            Step::Task(Err(e)) if e.is_cancelled() => {}
            Step::Task(Err(e)) => error!(error = %e, "Backend task panicked"),
            Step::Change(tag, Some(event)) => controller.on_change(tag, event),
            Step::Change(tag, None) => {
                warn!(conversation = %tag.conversation_id, "Change feed ended");
                feed = None;
            }
        }

        for event in controller.drain_events() {
            if notif_tx.send(event).await.is_err() {
                debug!("View receiver dropped");
                break;
            }
        }
    }

    tasks.abort_all();
}

async fn next_change(feed: &mut Option<(RequestTag, Subscription)>) -> (RequestTag, Option<ChangeEvent>) {
    match feed {
        Some((tag, subscription)) => (*tag, subscription.recv().await),
        None => std::future::pending().await,
    }
}

fn handle_command<B>(
    backend: &Arc<B>,
    controller: &mut ChatController,
    tasks: &mut JoinSet<TaskOutput>,
    feed: &mut Option<(RequestTag, Subscription)>,
    cmd: SessionCommand,
) -> ControlFlow<()>
where
    B: ChatBackend + ?Sized,
{
    match cmd {
        SessionCommand::Open(conversation_id) => {
            cancel_backend_calls(tasks, feed);
            for effect in controller.open(conversation_id) {
                dispatch(backend, tasks, effect);
            }
        }
        SessionCommand::Close => {
            cancel_backend_calls(tasks, feed);
            controller.close();
        }
        SessionCommand::SetInput(text) => controller.set_input(text),
        SessionCommand::Submit => {
            if let Some(effect) = controller.submit() {
                dispatch(backend, tasks, effect);
            }
        }
        SessionCommand::BeginEdit(id) => {
            controller.begin_edit(id);
        }
        SessionCommand::SetEditDraft(text) => controller.set_edit_draft(text),
        SessionCommand::SubmitEdit => {
            if let Some(effect) = controller.submit_edit() {
                dispatch(backend, tasks, effect);
            }
        }
        SessionCommand::CancelEdit => controller.cancel_edit(),
        SessionCommand::Delete(id) => {
            if let Some(effect) = controller.delete(id) {
                dispatch(backend, tasks, effect);
            }
        }
        SessionCommand::Scrolled(metrics) => {
            if let Some(effect) = controller.on_scroll(metrics) {
                dispatch(backend, tasks, effect);
            }
        }
        SessionCommand::ContentResized(height) => {
            controller.restore_scroll_anchor(height);
        }
        SessionCommand::Snapshot(reply) => {
            let _ = reply.send(controller.snapshot());
        }
        SessionCommand::Shutdown => return ControlFlow::Break(()),
    }
    ControlFlow::Continue(())
}

/// Abort every outstanding backend call and drop the change feed.  Results
/// of calls that already finished are dropped with them.
fn cancel_backend_calls(
    tasks: &mut JoinSet<TaskOutput>,
    feed: &mut Option<(RequestTag, Subscription)>,
) {
    *feed = None;
    tasks.abort_all();
    tasks.detach_all();
}

/// Run one effect against the backend in the task set.
fn dispatch<B>(backend: &Arc<B>, tasks: &mut JoinSet<TaskOutput>, effect: Effect)
where
    B: ChatBackend + ?Sized,
{
    let backend = Arc::clone(backend);
    match effect {
        Effect::Subscribe { tag } => {
            tasks.spawn(async move {
                let result = backend.subscribe(tag.conversation_id).await;
                TaskOutput::Subscribed { tag, result }
            });
        }
        Effect::FetchPage {
            tag,
            kind,
            before,
            limit,
        } => {
            tasks.spawn(async move {
                let result = backend
                    .fetch_page(tag.conversation_id, before, limit)
                    .await;
                TaskOutput::Completed(Completion::PageLoaded { tag, kind, result })
            });
        }
        Effect::Send {
            tag,
            provisional,
            author_id,
            body,
        } => {
            tasks.spawn(async move {
                let result = backend
                    .send_message(tag.conversation_id, author_id, body)
                    .await;
                TaskOutput::Completed(Completion::Sent {
                    tag,
                    provisional,
                    result,
                })
            });
        }
        Effect::Edit { tag, id, body } => {
            tasks.spawn(async move {
                let result = backend.edit_message(id, body).await;
                TaskOutput::Completed(Completion::Edited { tag, id, result })
            });
        }
        Effect::Delete { tag, id } => {
            tasks.spawn(async move {
                let result = backend.delete_message(id).await;
                TaskOutput::Completed(Completion::Deleted { tag, id, result })
            });
        }
    }
}
