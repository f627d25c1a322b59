use crate::types::Values;

/// Merge a fresh sample into the retained one, channel by channel
///
/// A channel keeps its incoming value when that value is finite and otherwise
/// holds the previous value. Channels never influence each other, and there is
/// no smoothing or staleness tracking: a channel that has never seen a finite
/// reading keeps whatever the retained default was.
#[must_use]
pub fn reconcile(incoming: Values, previous: Values) -> Values {
    Values {
        light: hold(incoming.light, previous.light),
        humidity: hold(incoming.humidity, previous.humidity),
        soil_humidity: hold(incoming.soil_humidity, previous.soil_humidity),
        temperature: hold(incoming.temperature, previous.temperature),
    }
}

fn hold(incoming: f32, previous: f32) -> f32 {
    if incoming.is_finite() {
        incoming
    } else {
        previous
    }
}
