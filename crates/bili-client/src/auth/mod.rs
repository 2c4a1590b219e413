pub mod cookie;
pub mod credential;
pub mod passport;
pub mod session;
