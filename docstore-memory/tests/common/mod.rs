#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_subscriber::{
    Layer,
    layer::{Context, SubscriberExt},
};

use docstore_core::{config::ConnectionConfig, document::Document, logging::Logger, store::Store};
use docstore_memory::{InMemoryBackend, InMemoryServer};

pub const DATABASE: &str = "shop";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub sku: String,
    pub qty: i64,
    pub status: String,
}

impl Order {
    pub fn new(sku: &str, qty: i64, status: &str) -> Self {
        Order { id: None, sku: sku.into(), qty, status: status.into() }
    }
}

impl Document for Order {
    fn collection_name() -> &'static str {
        "orders"
    }

    fn id(&self) -> Option<ObjectId> {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }
}

pub fn store(server: &InMemoryServer) -> Store<InMemoryBackend> {
    Store::new(server.backend(), DATABASE)
}

pub fn config() -> ConnectionConfig {
    ConnectionConfig::new(vec!["db-1:27017".into(), "db-2:27017".into()], DATABASE)
        .credentials("svc", "secret")
        .replica_set("rs0")
}

/// Counts events delivered to the logger it builds.
#[derive(Clone, Default)]
pub struct EventCounter {
    events: Arc<AtomicUsize>,
    warnings: Arc<AtomicUsize>,
}

impl EventCounter {
    pub fn logger(&self) -> Logger {
        Logger::new(Dispatch::new(tracing_subscriber::registry().with(self.clone())))
    }

    pub fn events(&self) -> usize {
        self.events.load(Ordering::SeqCst)
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for EventCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.events.fetch_add(1, Ordering::SeqCst);
        if *event.metadata().level() == Level::WARN {
            self.warnings.fetch_add(1, Ordering::SeqCst);
        }
    }
}
