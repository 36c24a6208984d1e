mod customer_events;

pub use customer_events::{CustomerEventsHandler, HandlerSettings, ProcessOutcome};
