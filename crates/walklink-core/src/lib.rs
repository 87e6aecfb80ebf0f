pub mod error;
pub mod geo;
pub mod identity;
pub mod location;
pub mod memory_store;
pub mod model;
pub mod notify;
pub mod protocol;
pub mod store;

pub use error::{HubError, NotifyError, StoreError};
pub use identity::{IdentityError, IdentityVerifier, TokenTableVerifier, VerifiedIdentity};
pub use location::{LocationPayload, LocationUpdate};
pub use memory_store::{MemoryStore, Seed};
pub use model::{
    ChatMessage, ChatRoomRecord, GeoPoint, LocationSample, MemberPatch, MemberState,
    MessageKind, NewChatMessage, OpenFlag, PositionUpdate, PresenceStatus, Role, UserProfile,
    WalkRecord, WalkStatus,
};
pub use notify::{ChatNotification, Notifier};
pub use store::RecordStore;
