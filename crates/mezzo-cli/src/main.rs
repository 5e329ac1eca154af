//! Mezzo CLI - JSON-RPC control daemon

mod backend;
mod cli;
mod settings;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use backend::LoopbackBackend;
use cli::Args;
use settings::Settings;

use mezzo_core::rpc::register_all;
use mezzo_core::{
    Capabilities, EventBus, FileBrowser, ModuleInfo, Player, Registry, RpcRegistry, SimplePlaylist,
};


/// ID shared by the local player, its playlist and its module.
const LOCAL_ID: &str = "local";


/// Sets up logging to stderr; stdout carries the protocol.
fn init_tracing( default_filter: &str ) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( default_filter ) )
        )
        .with_writer( std::io::stderr )
        .init();
}


/// Creates and registers every entity of the daemon.
fn build_registry( args: &Args, settings: &Settings, bus: &Arc<EventBus> ) -> Result<Arc<Registry>> {
    let registry = Arc::new( Registry::new( Arc::clone( bus ) ) );

    registry.add_module( LOCAL_ID, ModuleInfo {
        name: "Local".to_string(),
        description: "Local file playback".to_string(),
    })?;

    let playlist = Arc::new( SimplePlaylist::new( LOCAL_ID ) );
    playlist.set_cover_url_override( settings.cover_url_override );

    let name = args.name.as_deref().unwrap_or( &settings.player_name );
    let player = Player::new(
        LOCAL_ID,
        name,
        Capabilities::all(),
        Box::new( LoopbackBackend::new() ),
        Arc::clone( bus ),
    );
    player.set_playlist( Some( playlist.clone() ) );
    player.set_volume( settings.volume )?;

    registry.add_playlist( playlist )?;
    registry.add_player( player )?;

    let music_dir = args.music_dir.clone()
        .or_else( || settings.music_dir.clone() )
        .or_else( dirs::home_dir )
        .unwrap_or_else( || PathBuf::from( "." ) );
    tracing::info!( "Browsing {}", music_dir.display() );
    registry.add_browser( "files", Arc::new( FileBrowser::new( music_dir ) ) )?;

    Ok( registry )
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings_path = args.settings.clone().or_else( Settings::default_path );
    let settings = settings_path.as_deref()
        .map( Settings::load_from )
        .unwrap_or_default();

    init_tracing( args.log.as_deref().unwrap_or( &settings.log_filter ) );

    if let Some( ref path ) = settings_path {
        if !path.exists() {
            settings.save_to( path );
        }
    }

    let bus = Arc::new( EventBus::new() );
    let registry = build_registry( &args, &settings, &bus )?;

    let rpc = Arc::new( RpcRegistry::new() );
    register_all( &rpc, &registry )?;
    tracing::info!( "Serving {} namespaces on stdin/stdout", rpc.namespaces().len() );

    let push_events = settings.push_events && !args.no_events;
    let result = transport::serve(
        BufReader::new( tokio::io::stdin() ),
        tokio::io::stdout(),
        rpc,
        Arc::clone( &bus ),
        push_events,
    ).await;

    registry.clear();
    result.map( |_| () )
}
