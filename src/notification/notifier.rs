use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use crate::notification::{RemovalCause, RemovalListener};

/// Delivers removal notifications, isolating the map from panicking
/// listeners.
pub(crate) struct RemovalNotifier {
    #[cfg(feature = "logging")]
    map_name: Option<String>,
}

impl RemovalNotifier {
    pub(crate) fn new(_map_name: Option<String>) -> Self {
        Self {
            #[cfg(feature = "logging")]
            map_name: _map_name,
        }
    }

    pub(crate) fn notify<K, V>(
        &self,
        listener: &RemovalListener<K, V>,
        key: Arc<K>,
        value: V,
        cause: RemovalCause,
    ) {
        let listener_clo = || listener(key, value, cause);

        // Safety: The listener only gets owned copies of the key and value, and
        // the map's state has been fully updated before it is called.
        let result = catch_unwind(AssertUnwindSafe(listener_clo));
        if let Err(_payload) = result {
            #[cfg(feature = "logging")]
            log_panic(&*_payload, self.map_name.as_deref(), cause);
        }
    }
}

#[cfg(feature = "logging")]
fn log_panic(
    payload: &(dyn std::any::Any + Send + 'static),
    map_name: Option<&str>,
    cause: RemovalCause,
) {
    // Try to downcast the payload into &str or String.
    let message: Option<std::borrow::Cow<'_, str>> =
        (payload.downcast_ref::<&str>().map(|s| (*s).into()))
            .or_else(|| payload.downcast_ref::<String>().map(Into::into));

    let mn = crate::common::log_prefix(map_name);

    if let Some(m) = message {
        log::error!("{mn}The removal listener panicked at '{m}' (cause: {cause:?})");
    } else {
        log::error!("{mn}The removal listener panicked (cause: {cause:?})");
    }
}
