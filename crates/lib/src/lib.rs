//! Buddybot core library: the OSCAR wire codec, the AIM chat session, and the bot backends
//! that write the replies.

pub mod bot;
pub mod config;
pub mod oscar;
pub mod wire;
