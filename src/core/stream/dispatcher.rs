use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::store::{EventNotice, StoredEvent, WorkflowStore};

const BATCH_SIZE: i64 = 256;
const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Deliver only events with a cursor strictly greater than this.
    pub cursor: Option<i64>,
    /// Deliver a single event and end: the run's result, or its error or
    /// `cancelled` status event when the run ends without one. Subscribers
    /// must check `is_final` to tell the two apart.
    pub final_only: bool,
    /// Restrict delivery to the events of one run.
    ///
    /// With neither `cursor` nor `message_id` set, the subscription follows
    /// the conversation's current run: the active one, else the run whose
    /// outcome was recorded last.
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    RequestFinal,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Raw log tail, never ends on its own.
    Tail,
    Stream,
    FinalOnly,
}

/// One subscriber's view of a conversation's event log.
pub struct Subscription {
    events: mpsc::Receiver<StoredEvent>,
    control: mpsc::Sender<StreamControl>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<StoredEvent> {
        self.events.recv().await
    }

    /// Switches to final-only delivery from the current position.
    pub async fn request_final(&self) {
        let _ = self.control.send(StreamControl::RequestFinal).await;
    }

    /// Ends the subscription and releases its pump task.
    pub async fn cancel(mut self) {
        let _ = self.control.send(StreamControl::Cancel).await;
        self.events.close();
    }

    #[cfg(test)]
    pub fn controller(&self) -> mpsc::Sender<StreamControl> {
        self.control.clone()
    }

    pub fn into_stream(self) -> ReceiverStream<StoredEvent> {
        ReceiverStream::new(self.events)
    }
}

#[derive(Clone)]
pub struct StreamDispatcher {
    store: WorkflowStore,
}

impl StreamDispatcher {
    pub fn new(store: WorkflowStore) -> Self {
        Self { store }
    }

    pub async fn subscribe(
        &self,
        conversation_id: &str,
        options: SubscribeOptions,
    ) -> WorkflowResult<Subscription> {
        let mode = if options.final_only {
            Mode::FinalOnly
        } else {
            Mode::Stream
        };
        self.attach(conversation_id, options, mode).await
    }

    /// Finite-then-live read of the log after `cursor`, in cursor order.
    pub async fn read_from(
        &self,
        conversation_id: &str,
        cursor: Option<i64>,
    ) -> WorkflowResult<ReceiverStream<StoredEvent>> {
        let options = SubscribeOptions {
            cursor,
            ..Default::default()
        };
        Ok(self
            .attach(conversation_id, options, Mode::Tail)
            .await?
            .into_stream())
    }

    async fn attach(
        &self,
        conversation_id: &str,
        mut options: SubscribeOptions,
        mode: Mode,
    ) -> WorkflowResult<Subscription> {
        // Subscribe before the first query so no append can slip between them.
        let notices = self.store.subscribe_notices();
        if self.store.get_conversation(conversation_id).await?.is_none() {
            return Err(WorkflowError::not_found("conversation", conversation_id));
        }
        if mode != Mode::Tail && options.cursor.is_none() && options.message_id.is_none() {
            options.message_id = self.store.current_message_id(conversation_id).await?;
        }

        let (event_tx, event_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let (control_tx, control_rx) = mpsc::channel(8);
        let pump = Pump {
            store: self.store.clone(),
            conversation_id: conversation_id.to_string(),
            message_id: options.message_id,
            cursor: options.cursor.unwrap_or(0),
            mode,
            out: event_tx,
            control: control_rx,
            control_open: true,
            notices,
        };
        tokio::spawn(pump.run());

        Ok(Subscription {
            events: event_rx,
            control: control_tx,
        })
    }
}

enum Wakeup {
    Appended,
    Control(StreamControl),
    Closed,
}

struct Pump {
    store: WorkflowStore,
    conversation_id: String,
    message_id: Option<String>,
    cursor: i64,
    mode: Mode,
    out: mpsc::Sender<StoredEvent>,
    control: mpsc::Receiver<StreamControl>,
    control_open: bool,
    notices: broadcast::Receiver<EventNotice>,
}

impl Pump {
    async fn run(mut self) {
        loop {
            match self.deliver().await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        conversation_id = %self.conversation_id,
                        "Stream pump stopped on storage error: {}", e
                    );
                    break;
                }
            }
            match self.wait().await {
                Wakeup::Appended => {}
                Wakeup::Control(StreamControl::RequestFinal) => {
                    debug!(conversation_id = %self.conversation_id, "Subscriber switched to final-only");
                    self.mode = Mode::FinalOnly;
                }
                Wakeup::Control(StreamControl::Cancel) | Wakeup::Closed => break,
            }
        }
        debug!(conversation_id = %self.conversation_id, cursor = self.cursor, "Stream pump released");
    }

    /// Sends whatever is currently deliverable. Returns true once the
    /// subscription is finished.
    async fn deliver(&mut self) -> WorkflowResult<bool> {
        if self.mode == Mode::FinalOnly {
            return self.deliver_final().await;
        }
        loop {
            let batch = self
                .store
                .list_events_after(
                    &self.conversation_id,
                    self.cursor,
                    BATCH_SIZE,
                    self.message_id.as_deref(),
                )
                .await?;
            if batch.is_empty() {
                return Ok(false);
            }
            for event in batch {
                self.cursor = event.cursor;
                let ends = event.ends_stream;
                if self.out.send(event).await.is_err() {
                    return Ok(true);
                }
                if ends && self.mode == Mode::Stream {
                    return Ok(true);
                }
            }
            match self.control.try_recv() {
                Ok(StreamControl::RequestFinal) => {
                    self.mode = Mode::FinalOnly;
                    return self.deliver_final().await;
                }
                Ok(StreamControl::Cancel) => return Ok(true),
                Err(_) => {}
            }
        }
    }

    async fn deliver_final(&mut self) -> WorkflowResult<bool> {
        let found = self
            .store
            .first_stream_end_after(&self.conversation_id, self.cursor, self.message_id.as_deref())
            .await?;
        match found {
            Some(event) => {
                self.cursor = event.cursor;
                let _ = self.out.send(event).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn wait(&mut self) -> Wakeup {
        loop {
            tokio::select! {
                notice = self.notices.recv() => match notice {
                    Ok(notice) if notice.conversation_id == self.conversation_id => {
                        return Wakeup::Appended;
                    }
                    Ok(_) => continue,
                    // Missed notices are recovered by re-querying from the cursor.
                    Err(RecvError::Lagged(_)) => return Wakeup::Appended,
                    Err(RecvError::Closed) => return Wakeup::Closed,
                },
                control = self.control.recv(), if self.control_open => match control {
                    Some(signal) => return Wakeup::Control(signal),
                    None => self.control_open = false,
                },
                _ = self.out.closed() => return Wakeup::Closed,
            }
        }
    }
}
