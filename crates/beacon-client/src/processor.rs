use crate::Error;
use tokio::sync::oneshot;

/// Completion signal for an update processor's first transition: `Ok` on
/// the first successful data apply, `Err` on the first unrecoverable
/// failure. Fired exactly once.
pub type InitSignal = oneshot::Sender<Result<(), Error>>;

/// A source of rule-data updates feeding the store: the streaming
/// processor, the polling processor, or nothing at all.
pub trait UpdateProcessor: Send {
    /// Begins delivering updates. Must be called from within a Tokio
    /// runtime; returns immediately.
    fn start(&mut self, init: InitSignal);

    /// Stops delivering updates and abandons in-flight work. Idempotent.
    fn close(&mut self);
}

/// The processor used when the client is offline or reading a store
/// populated out-of-band: it delivers nothing and reports success.
pub struct NullUpdateProcessor;

impl UpdateProcessor for NullUpdateProcessor {
    fn start(&mut self, init: InitSignal) {
        let _ = init.send(Ok(()));
    }

    fn close(&mut self) {}
}
