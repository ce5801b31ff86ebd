//! Market-structure pattern detectors.
//!
//! Each detector is a pure pass over an aggregator snapshot, re-run on the
//! poll tick. Zones and S/R levels carry `status`/`touch_count` forward via
//! explicit `update_*` steps instead of being recomputed from scratch.

pub mod absorption;
pub mod cascade;
pub mod mean_reversion;
pub mod support_resistance;
pub mod volume_profile;

pub use absorption::{detect_zones, merge_zones, update_zones, AbsorptionZone, ZoneStatus};
pub use cascade::{detect_cascades, LiquidationCascade};
pub use mean_reversion::{detect_reversion, MeanReversionSetup, ReversionCondition};
pub use support_resistance::{
    detect_levels, merge_levels, update_levels, LevelKind, SupportResistanceLevel,
};
pub use volume_profile::{build_profile, MarkerKind, ProfileLevel, ProfileMarker, VolumeProfile};
