//! An async WebSocket protocol engine for the Tokio stack, implementing
//! [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455) for both client
//! and server roles, with optional TLS.
//!
//! This crate covers the opening handshake, the frame codec, fragmented
//! message reassembly with incremental UTF-8 validation, control-frame
//! handling, and the connection lifecycle that binds all of that to a
//! `tokio::net::TcpStream` (plain or TLS-wrapped). It does not implement
//! `permessage-deflate` or other extensions, subprotocol negotiation, or
//! HTTP routing beyond the single Upgrade request/reply.
//!
//! Typical usage: [`handshake::connect_async`] or [`handshake::accept_async`]
//! produce a [`connection::Connection`], which is then [`connection::Connection::split`]
//! into a `Stream` of inbound [`message::Message`]s and a [`split::WSWriter`]
//! handle for sending. [`server::start_server`] wraps the accept loop into an
//! [`event::EventStream`] for servers that want to manage many connections
//! from one task.

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod message;
mod read;
mod request;
pub mod server;
pub mod split;
pub mod stream;
pub mod utf8;
mod write;
