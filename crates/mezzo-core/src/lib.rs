//! Mezzo Core - media appliance control plane
//!
//! This crate tracks players and their playlists, publishes every state
//! change through the event bus, and exposes both through a namespaced
//! JSON-RPC method registry.

pub mod browser;
pub mod event;
pub mod player;
pub mod playlist;
pub mod probe;
pub mod registry;
pub mod rpc;
pub mod simple_playlist;
pub mod status;
pub mod tags;

mod sync;

pub use browser::{ Browser, BrowserError, BrowserInfo, BrowserItem, FileBrowser, ItemType };
pub use event::{ BrowserEvent, Event, EventBus, EventClient, EventType, ModuleEvent, PlayerEvent, PlaylistEvent };
pub use player::{ Capabilities, PlaybackBackend, Player, PlayerError, PlayerInfo };
pub use playlist::{ AdvanceTarget, Direction, Playlist, PlaylistError, PlaylistItem, PlaylistList };
pub use probe::{ read_duration, read_tags, ProbeError };
pub use registry::{ ModuleInfo, Registry, RegistryError };
pub use rpc::{ Method, ParamSpec, Params, RegisterError, RpcError, RpcRegistry, ValueType };
pub use simple_playlist::SimplePlaylist;
pub use status::{ PlayerState, PlayerStatus, StatusSnapshot };
pub use tags::{ Cover, TagFields, Tags };
