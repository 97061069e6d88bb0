//! # courier-protocol
//!
//! Wire protocol definitions for the Courier realtime chat relay.
//!
//! Events travel as JSON text frames over the WebSocket. Inbound and
//! outbound events are closed tagged unions: the `event` field selects the
//! variant, the `data` field carries the payload. Payload keys are
//! camelCase for compatibility with the client contract, event names are
//! snake_case.
//!
//! ```json
//! {"event":"send_message","data":{"receiverId":"...","content":"hi"}}
//! ```

pub mod codec;
pub mod events;
pub mod model;

pub use codec::ProtocolError;
pub use events::{ClientEvent, SendAck, ServerEvent};
pub use model::{DeliveryStatus, PopulatedMessage, StoredMessage, UserProfile};
