pub mod entities;
pub mod geo;
pub mod notifier;
pub mod repositories;

pub use entities::*;
pub use geo::{haversine_km, GeoPoint};
pub use notifier::{PushError, PushNotifier, PushPayload};
pub use repositories::*;
pub use watertruck_core::{DispatchError, DispatchResult};
