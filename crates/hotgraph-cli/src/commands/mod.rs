pub mod inspect;
pub mod simulate;
pub mod version;
pub mod watch;
