//! Coursecast notification server library.
//! Real-time fan-out of course-management change events over WebSocket.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod config;
pub mod db;
pub mod notify;
pub mod routes;
pub mod state;
pub mod ws;
