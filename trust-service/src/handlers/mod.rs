pub mod credential;
pub mod session;
pub mod token;
pub mod well_known;
