//! Wiring: one store, one broadcaster, one delivery queue, one transport.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{AdminAuth, AppState};
use crate::config::DeskConfig;
use crate::delivery::{DeliveryQueue, Outbound};
use crate::error::Result;
use crate::events::{DeskEvent, EventBroadcaster};
use crate::pipeline::InboundProcessor;
use crate::store::ConversationStore;
use crate::transport::{EventStream, Transport, TransportEvent};
use crate::triage::{RuleBook, TriageEngine};

/// The assembled help desk.
#[derive(Clone)]
pub struct Desk {
    pub store: Arc<dyn ConversationStore>,
    pub events: Arc<EventBroadcaster>,
    pub triage: Arc<TriageEngine>,
    pub outbound: Arc<Outbound>,
    pub processor: Arc<InboundProcessor>,
    pub transport: Arc<dyn Transport>,
}

impl Desk {
    pub fn new(
        config: &DeskConfig,
        store: Arc<dyn ConversationStore>,
        transport: Arc<dyn Transport>,
        book: RuleBook,
    ) -> Self {
        let events = Arc::new(EventBroadcaster::new());
        let triage = Arc::new(TriageEngine::new(book));
        let queue = DeliveryQueue::new(config.delivery);
        let outbound = Arc::new(
            Outbound::new(
                queue,
                Arc::clone(&transport),
                Arc::clone(&store),
                Arc::clone(&events),
            )
            .with_allowlist(config.allowlist.clone())
            .with_bot_name(config.bot_name.clone()),
        );
        let processor = Arc::new(
            InboundProcessor::new(
                Arc::clone(&store),
                Arc::clone(&triage),
                Arc::clone(&outbound),
                Arc::clone(&events),
            )
            .with_handoff(config.handoff.clone()),
        );

        Self {
            store,
            events,
            triage,
            outbound,
            processor,
            transport,
        }
    }

    pub fn app_state(&self, auth: AdminAuth) -> AppState {
        AppState {
            store: Arc::clone(&self.store),
            outbound: Arc::clone(&self.outbound),
            events: Arc::clone(&self.events),
            transport: Arc::clone(&self.transport),
            triage: Arc::clone(&self.triage),
            auth,
        }
    }

    /// Start the transport and spawn the task that feeds its events into
    /// the pipeline.
    pub async fn launch(&self) -> Result<JoinHandle<()>> {
        let stream = self.transport.start().await?;
        let desk = self.clone();
        Ok(tokio::spawn(async move { desk.run_transport(stream).await }))
    }

    /// Drain transport events until the stream ends. Messages are handled
    /// one at a time, in arrival order.
    pub async fn run_transport(&self, mut stream: EventStream) {
        info!(transport = self.transport.name(), "Listening for transport events");

        while let Some(event) = stream.next().await {
            match event {
                TransportEvent::Status(status) => {
                    self.events.publish(DeskEvent::Wa { status });
                }
                TransportEvent::Inbound(message) => {
                    let conversation_id = message.conversation_id.clone();
                    if let Err(e) = self.processor.process(message).await {
                        warn!(conversation_id = %conversation_id, error = %e, "Inbound message dropped");
                    }
                }
            }
        }

        info!("Transport event stream ended");
    }
}
