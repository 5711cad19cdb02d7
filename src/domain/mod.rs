pub mod church;
pub mod donation;
pub mod donation_type;
pub mod donor;
pub mod payout;

pub use church::*;
pub use donation::*;
pub use donation_type::*;
pub use donor::*;
pub use payout::*;
