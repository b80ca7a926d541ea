#![doc = include_str!("../README.md")]

pub mod server;

pub use server::{
    config::{CliArgs, ServerConfig},
    lifecycle::{RelayServer, ServerHandle, ServerState},
    service::handler::{RelayService, build_relay_service},
    store::{IdGenerator, MemoryStore, RecordStore, UuidV7Ids},
};
