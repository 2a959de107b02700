use tokio::sync::OwnedSemaphorePermit;

/// Proof of admission.
///
/// Permits from time based strategies carry nothing: their capacity returns when
/// the window moves or tokens replenish. Permits from a [`ConcurrencyLimit`] hold a
/// slot until they are dropped, so release happens on every exit path.
///
/// [`ConcurrencyLimit`]: crate::ConcurrencyLimit
#[derive(Debug)]
#[must_use = "dropping a permit releases any concurrency slot it holds"]
pub struct Permit {
    slot: Option<OwnedSemaphorePermit>,
}

impl Permit {
    pub(crate) fn detached() -> Self {
        Self { slot: None }
    }

    pub(crate) fn held(slot: OwnedSemaphorePermit) -> Self {
        Self { slot: Some(slot) }
    }

    /// Whether dropping this permit gives capacity back to its policy.
    pub fn is_held(&self) -> bool {
        self.slot.is_some()
    }
}
