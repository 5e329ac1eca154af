//! Core player implementation
//!
//! A `Player` pairs a playback backend with its live status and an optional
//! playlist. Commands are checked against the player's capabilities and
//! forwarded to the backend; the backend reports progress and failures back
//! through the `PlayerStatus` it receives on attach.

use std::sync::{ Arc, RwLock };

use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::playlist::{ Direction, Playlist, PlaylistError };
use crate::status::{ PlayerState, PlayerStatus, StatusSnapshot };
use crate::event::EventBus;
use crate::sync::{ read, write };
use crate::tags::Tags;


/// Errors that can occur when commanding a player.
#[derive( Debug, Error )]
pub enum PlayerError {
    #[error( "Operation not supported: {0}" )]
    Unsupported( &'static str ),

    #[error( "No playlist attached" )]
    NoPlaylist,

    #[error( "Player is in error state" )]
    Errored,

    #[error( "Backend error: {0}" )]
    Backend( String ),

    #[error( "Playlist error: {0}" )]
    Playlist( #[from] PlaylistError ),
}


/// Controls a player advertises to clients.
#[derive( Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize )]
pub struct Capabilities {
    pub add: bool,
    pub load: bool,
    pub play: bool,
    pub state: bool,
    pub prev: bool,
    pub next: bool,
    pub volume: bool,
    pub mute: bool,
}


impl Capabilities {
    /// Every control enabled.
    pub fn all() -> Self {
        Self {
            add: true,
            load: true,
            play: true,
            state: true,
            prev: true,
            next: true,
            volume: true,
            mute: true,
        }
    }
}


/// Description of a player as exposed to clients.
#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
    pub playlist_id: Option<String>,
    pub control: Capabilities,
}


/// The media pipeline behind a player.
///
/// The player only calls a method when the matching capability is
/// advertised. Once `add`, `load` or `play` has been accepted, failures are
/// reported asynchronously through `PlayerStatus::set_error`.
pub trait PlaybackBackend: Send + Sync {
    /// Receives the status the backend reports into. Called once, when the
    /// player is created.
    fn attach( &self, _status: Arc<PlayerStatus> ) {}

    fn add( &self, _path: &str ) {}

    /// Prepares a media without starting it.
    fn load( &self, _path: &str, _stopped: bool ) {}

    fn play( &self, _path: &str ) {}

    /// Applies a state change (pause, resume, stop).
    ///
    /// @returns The state actually entered
    fn set_state( &self, state: PlayerState ) -> Result<PlayerState, PlayerError> {
        Ok( state )
    }

    /// Seeks in the current media.
    ///
    /// @returns The position actually reached (in ms)
    fn set_pos( &self, _position_ms: u64 ) -> Result<u64, PlayerError> {
        Err( PlayerError::Unsupported( "seek" ) )
    }

    /// Returns the live position (in ms), if the backend tracks one.
    fn position( &self ) -> Option<u64> {
        None
    }

    fn set_volume( &self, volume: f64 ) -> Result<f64, PlayerError> {
        Ok( volume )
    }

    fn set_mute( &self, mute: bool ) -> Result<bool, PlayerError> {
        Ok( mute )
    }
}


/// A playback endpoint.
pub struct Player {
    id: String,
    name: String,
    capabilities: Capabilities,
    backend: Box<dyn PlaybackBackend>,
    status: Arc<PlayerStatus>,
    playlist: RwLock<Option<Arc<dyn Playlist>>>,
}


impl Player {
    /// Creates a player and attaches its backend to the new status.
    ///
    /// @param id - Stable identifier
    /// @param name - Display name
    /// @param capabilities - Controls supported by the backend
    /// @param backend - The media pipeline
    /// @param bus - Where status changes are published
    pub fn new(
        id: &str,
        name: &str,
        capabilities: Capabilities,
        backend: Box<dyn PlaybackBackend>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let status = Arc::new( PlayerStatus::new( id, bus ) );
        backend.attach( Arc::clone( &status ) );

        Arc::new( Self {
            id: id.to_string(),
            name: name.to_string(),
            capabilities,
            backend,
            status,
            playlist: RwLock::new( None ),
        })
    }


    pub fn id( &self ) -> &str {
        &self.id
    }


    pub fn name( &self ) -> &str {
        &self.name
    }


    pub fn capabilities( &self ) -> Capabilities {
        self.capabilities
    }


    /// Returns the description sent to clients.
    pub fn info( &self ) -> PlayerInfo {
        PlayerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            playlist_id: self.playlist().map( |p| p.id().to_string() ),
            control: self.capabilities,
        }
    }


    /// Returns the live status.
    pub fn status( &self ) -> &Arc<PlayerStatus> {
        &self.status
    }


    /// Returns the current snapshot and its timestamp.
    pub fn get_status( &self ) -> ( Arc<StatusSnapshot>, u64 ) {
        self.status.get_status()
    }


    /// Attaches a playlist, or detaches with `None`.
    pub fn set_playlist( self: &Arc<Self>, playlist: Option<Arc<dyn Playlist>> ) {
        if let Some( ref playlist ) = playlist {
            playlist.set_player( Arc::downgrade( self ) );
        }
        *write( &self.playlist ) = playlist;
        self.sync_playlist_flags();
    }


    /// Gets the attached playlist.
    pub fn playlist( &self ) -> Option<Arc<dyn Playlist>> {
        read( &self.playlist ).clone()
    }


    /// Adds a media to the player (and its playlist) without playing it.
    pub fn add( &self, path: &str, name: Option<&str>, tags: Option<Arc<Tags>> ) -> Result<(), PlayerError> {
        if !self.capabilities.add {
            return Err( PlayerError::Unsupported( "add" ) );
        }

        tracing::info!( "Player {}: add {}", self.id, path );
        if let Some( playlist ) = self.playlist() {
            playlist.add( name, name, path, tags, false )?;
        }

        if self.status.state() == PlayerState::Error {
            self.status.set_state( PlayerState::None );
        }
        self.backend.add( path );
        Ok(())
    }


    /// Loads a media in paused (or stopped) state.
    ///
    /// @param insert - Also add the media to the playlist as current
    /// @param stopped - Enter `Stopped` instead of `PausedLoading`
    pub fn load(
        &self,
        path: &str,
        name: Option<&str>,
        tags: Option<Arc<Tags>>,
        insert: bool,
        stopped: bool,
    ) -> Result<(), PlayerError> {
        if !self.capabilities.load {
            return Err( PlayerError::Unsupported( "load" ) );
        }

        tracing::info!( "Player {}: load {}", self.id, path );
        let name = self.insert_if( insert, path, name, tags.clone() )?;
        let state = if stopped { PlayerState::Stopped } else { PlayerState::PausedLoading };
        self.status.reset( state, Some( name.as_deref().unwrap_or( path ) ), tags );
        self.backend.load( path, stopped );
        Ok(())
    }


    /// Starts playing a media.
    ///
    /// @param insert - Also add the media to the playlist as current
    pub fn play(
        &self,
        path: &str,
        name: Option<&str>,
        tags: Option<Arc<Tags>>,
        insert: bool,
    ) -> Result<(), PlayerError> {
        if !self.capabilities.play {
            return Err( PlayerError::Unsupported( "play" ) );
        }

        tracing::info!( "Player {}: play {}", self.id, path );
        let name = self.insert_if( insert, path, name, tags.clone() )?;
        self.status.reset( PlayerState::Loading, Some( name.as_deref().unwrap_or( path ) ), tags );
        self.backend.play( path );
        Ok(())
    }


    /// Requests a state change (play, pause, stop).
    ///
    /// A pause requested while loading or buffering becomes the matching
    /// paused variant.
    ///
    /// @returns The state entered
    pub fn set_state( &self, requested: PlayerState ) -> Result<PlayerState, PlayerError> {
        if !self.capabilities.state {
            return Err( PlayerError::Unsupported( "state" ) );
        }

        let current = self.status.state();
        if current == PlayerState::Error {
            return Err( PlayerError::Errored );
        }

        let target = current.resolve( requested );
        let entered = self.backend.set_state( target )?;

        // The engine may have failed while handling the command
        if self.status.set_state_unless_error( entered ).is_none() {
            return Err( PlayerError::Errored );
        }
        tracing::debug!( "Player {}: {} -> {}", self.id, current, entered );
        Ok( entered )
    }


    /// Drops the current media and returns to `None`.
    ///
    /// Unlike `set_state`, this does not depend on the state capability and
    /// also leaves the `Error` state.
    pub fn force_idle( &self ) {
        if self.capabilities.state {
            if let Err( e ) = self.backend.set_state( PlayerState::None ) {
                tracing::warn!( "Player {}: backend refused idle: {}", self.id, e );
            }
        }
        self.status.set_state( PlayerState::None );
    }


    /// Plays the previous media of the playlist.
    ///
    /// @returns false if there is no previous media
    pub fn prev( &self ) -> Result<bool, PlayerError> {
        if !self.capabilities.prev {
            return Err( PlayerError::Unsupported( "prev" ) );
        }
        self.step( Direction::Prev )
    }


    /// Plays the next media of the playlist.
    ///
    /// @returns false if there is no next media
    pub fn next( &self ) -> Result<bool, PlayerError> {
        if !self.capabilities.next {
            return Err( PlayerError::Unsupported( "next" ) );
        }
        self.step( Direction::Next )
    }


    /// Seeks in the current media.
    ///
    /// @returns The position reached (in ms)
    pub fn set_pos( &self, position_ms: u64 ) -> Result<u64, PlayerError> {
        let reached = self.backend.set_pos( position_ms )?;
        self.status.set_position( reached );
        Ok( reached )
    }


    /// Gets the current position in the media (in ms).
    pub fn get_pos( &self ) -> u64 {
        self.backend.position().unwrap_or_else( || self.status.position() )
    }


    /// Sets the volume (0.0 to 1.0).
    pub fn set_volume( &self, volume: f64 ) -> Result<f64, PlayerError> {
        if !self.capabilities.volume {
            return Err( PlayerError::Unsupported( "volume" ) );
        }

        let applied = self.backend.set_volume( volume.clamp( 0.0, 1.0 ) )?;
        self.status.set_volume( applied );
        Ok( applied )
    }


    pub fn set_mute( &self, mute: bool ) -> Result<bool, PlayerError> {
        if !self.capabilities.mute {
            return Err( PlayerError::Unsupported( "mute" ) );
        }

        let applied = self.backend.set_mute( mute )?;
        self.status.set_mute( applied );
        Ok( applied )
    }


    /// Publishes the playlist's previous/next availability in the status.
    pub fn sync_playlist_flags( &self ) {
        let ( has_prev, has_next ) = self.playlist()
            .map( |p| p.has_prev_next() )
            .unwrap_or(( false, false ));
        self.status.set_playlist_flags( has_prev, has_next );
    }


    /// Adds the media to the playlist as current when `insert` is set, before
    /// anything else changes.
    ///
    /// @returns The name the status should show
    fn insert_if(
        &self,
        insert: bool,
        path: &str,
        name: Option<&str>,
        tags: Option<Arc<Tags>>,
    ) -> Result<Option<String>, PlayerError> {
        if !insert {
            return Ok( name.map( str::to_string ) );
        }
        let playlist = self.playlist().ok_or( PlayerError::NoPlaylist )?;
        Ok( Some( playlist.add( name, name, path, tags, true )? ) )
    }


    fn step( &self, direction: Direction ) -> Result<bool, PlayerError> {
        if !self.capabilities.play {
            return Err( PlayerError::Unsupported( "play" ) );
        }
        let playlist = self.playlist().ok_or( PlayerError::NoPlaylist )?;

        let Some( target ) = playlist.advance( direction, true ) else {
            return Ok( false );
        };

        self.play( &target.path, Some( &target.name ), target.tags, false )?;
        self.sync_playlist_flags();
        Ok( true )
    }
}


#[cfg( test )]
pub( crate ) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::event::{ Event, PlayerEvent };
    use crate::simple_playlist::SimplePlaylist;


    /// Backend that records every call it receives.
    #[derive( Default )]
    pub( crate ) struct RecordingBackend {
        pub calls: Arc<Mutex<Vec<String>>>,
    }


    impl PlaybackBackend for RecordingBackend {
        fn add( &self, path: &str ) {
            self.calls.lock().unwrap().push( format!( "add {}", path ) );
        }

        fn load( &self, path: &str, stopped: bool ) {
            self.calls.lock().unwrap().push( format!( "load {} {}", path, stopped ) );
        }

        fn play( &self, path: &str ) {
            self.calls.lock().unwrap().push( format!( "play {}", path ) );
        }

        fn set_state( &self, state: PlayerState ) -> Result<PlayerState, PlayerError> {
            self.calls.lock().unwrap().push( format!( "state {}", state ) );
            Ok( state )
        }

        fn set_pos( &self, position_ms: u64 ) -> Result<u64, PlayerError> {
            self.calls.lock().unwrap().push( format!( "seek {}", position_ms ) );
            Ok( position_ms )
        }
    }


    pub( crate ) fn test_player( bus: &Arc<EventBus>, capabilities: Capabilities ) -> ( Arc<Player>, Arc<Mutex<Vec<String>>> ) {
        let backend = RecordingBackend::default();
        let calls = Arc::clone( &backend.calls );
        let player = Player::new( "p1", "Test player", capabilities, Box::new( backend ), Arc::clone( bus ) );
        ( player, calls )
    }


    #[test]
    fn test_play_resets_status_and_calls_backend() {
        let bus = Arc::new( EventBus::new() );
        let ( player, calls ) = test_player( &bus, Capabilities::all() );

        player.play( "/music/a.flac", Some( "A" ), None, false ).unwrap();

        let ( status, _ ) = player.get_status();
        assert_eq!( status.state, PlayerState::Loading );
        assert_eq!( status.media_name.as_deref(), Some( "A" ) );
        assert_eq!( *calls.lock().unwrap(), vec![ "play /music/a.flac" ] );
    }


    #[test]
    fn test_unsupported_command_fails_without_event() {
        let bus = Arc::new( EventBus::new() );
        let count = Arc::new( Mutex::new( 0 ) );
        let count_clone = Arc::clone( &count );
        bus.register( move |_, _, _| *count_clone.lock().unwrap() += 1 );
        let ( player, calls ) = test_player( &bus, Capabilities::default() );

        assert!( matches!( player.play( "x", None, None, false ), Err( PlayerError::Unsupported( "play" ) ) ) );
        assert!( matches!( player.add( "x", None, None ), Err( PlayerError::Unsupported( "add" ) ) ) );
        assert!( matches!( player.set_volume( 0.2 ), Err( PlayerError::Unsupported( "volume" ) ) ) );
        assert!( matches!( player.set_mute( true ), Err( PlayerError::Unsupported( "mute" ) ) ) );

        assert_eq!( *count.lock().unwrap(), 0 );
        assert!( calls.lock().unwrap().is_empty() );
    }


    #[test]
    fn test_pause_while_loading_keeps_intent() {
        let bus = Arc::new( EventBus::new() );
        let ( player, calls ) = test_player( &bus, Capabilities::all() );
        player.play( "x", None, None, false ).unwrap();

        assert_eq!( player.set_state( PlayerState::Paused ).unwrap(), PlayerState::PausedLoading );
        assert_eq!( player.status().state(), PlayerState::PausedLoading );
        assert_eq!( calls.lock().unwrap().last().unwrap(), "state paused_loading" );
    }


    #[test]
    fn test_error_state_blocks_until_new_media() {
        let bus = Arc::new( EventBus::new() );
        let ( player, _ ) = test_player( &bus, Capabilities::all() );
        player.play( "x", None, None, false ).unwrap();
        player.status().set_error( "stream lost" );

        assert!( matches!( player.set_state( PlayerState::Playing ), Err( PlayerError::Errored ) ) );

        player.play( "y", None, None, false ).unwrap();
        assert_eq!( player.status().state(), PlayerState::Loading );
        assert_eq!( player.set_state( PlayerState::Playing ).unwrap(), PlayerState::Playing );
    }


    #[test]
    fn test_volume_event_reaches_clients_in_order() {
        let bus = Arc::new( EventBus::new() );
        let log = Arc::new( Mutex::new( Vec::new() ) );
        for tag in [ "first", "second" ] {
            let log = Arc::clone( &log );
            bus.register( move |_, _, event| {
                if let Event::Player( PlayerEvent::Volume( v ) ) = event {
                    log.lock().unwrap().push(( tag, *v ));
                }
            });
        }
        let ( player, _ ) = test_player( &bus, Capabilities::all() );
        player.set_volume( 0.8 ).unwrap();
        log.lock().unwrap().clear();

        player.set_volume( 0.5 ).unwrap();

        assert_eq!( *log.lock().unwrap(), vec![ ( "first", 0.5 ), ( "second", 0.5 ) ] );
        assert_eq!( player.get_status().0.volume, 0.5 );
    }


    #[test]
    fn test_play_with_insert_adds_current_item() {
        let bus = Arc::new( EventBus::new() );
        let ( player, _ ) = test_player( &bus, Capabilities::all() );
        let playlist = Arc::new( SimplePlaylist::new( "pl" ) );
        player.set_playlist( Some( playlist.clone() ) );

        player.play( "/a.mp3", Some( "A" ), None, true ).unwrap();

        let list = playlist.get_list( Default::default() );
        assert_eq!( list.current.as_deref(), Some( "A" ) );
        assert_eq!( player.info().playlist_id.as_deref(), Some( "pl" ) );
    }


    #[test]
    fn test_insert_without_playlist_fails() {
        let bus = Arc::new( EventBus::new() );
        let ( player, _ ) = test_player( &bus, Capabilities::all() );
        assert!( matches!( player.play( "/a.mp3", None, None, true ), Err( PlayerError::NoPlaylist ) ) );
    }


    #[test]
    fn test_next_and_prev_walk_playlist() {
        let bus = Arc::new( EventBus::new() );
        let ( player, calls ) = test_player( &bus, Capabilities::all() );
        let playlist = Arc::new( SimplePlaylist::new( "pl" ) );
        player.set_playlist( Some( playlist.clone() ) );

        playlist.add( Some( "one" ), None, "/1", None, false ).unwrap();
        playlist.add( Some( "two" ), None, "/2", None, false ).unwrap();
        playlist.play( "one" ).unwrap();

        // "two" sits closer to the head, which is the `Next` direction
        assert!( player.next().unwrap() );
        assert_eq!( playlist.get_list( Default::default() ).current.as_deref(), Some( "two" ) );
        assert!( !player.next().unwrap() );

        assert!( player.prev().unwrap() );
        assert_eq!( calls.lock().unwrap().last().unwrap(), "play /1" );

        let status = player.get_status().0;
        assert!( !status.has_prev );
        assert!( status.has_next );
    }


    #[test]
    fn test_seek_updates_position() {
        let bus = Arc::new( EventBus::new() );
        let ( player, _ ) = test_player( &bus, Capabilities::all() );
        assert_eq!( player.set_pos( 42_000 ).unwrap(), 42_000 );
        assert_eq!( player.get_pos(), 42_000 );
    }


    /// Backend whose engine fails while it handles a state change.
    #[derive( Default )]
    struct FailingBackend {
        status: Mutex<Option<Arc<PlayerStatus>>>,
    }


    impl PlaybackBackend for FailingBackend {
        fn attach( &self, status: Arc<PlayerStatus> ) {
            *self.status.lock().unwrap() = Some( status );
        }

        fn play( &self, _path: &str ) {}

        fn set_state( &self, state: PlayerState ) -> Result<PlayerState, PlayerError> {
            if let Some( ref status ) = *self.status.lock().unwrap() {
                status.set_error( "device lost" );
            }
            Ok( state )
        }
    }


    #[test]
    fn test_failed_insert_leaves_status_unchanged() {
        let bus = Arc::new( EventBus::new() );
        let ( player, calls ) = test_player( &bus, Capabilities::all() );
        player.play( "/a", None, None, false ).unwrap();
        player.status().set_state( PlayerState::Playing );
        let ( before, timestamp ) = player.get_status();

        assert!( matches!( player.play( "/x", Some( "X" ), None, true ), Err( PlayerError::NoPlaylist ) ) );
        assert!( matches!( player.load( "/x", Some( "X" ), None, true, false ), Err( PlayerError::NoPlaylist ) ) );

        let ( after, timestamp_after ) = player.get_status();
        assert_eq!( after.state, PlayerState::Playing );
        assert_eq!( after.media_name.as_deref(), Some( "/a" ) );
        assert_eq!( timestamp_after, timestamp );
        assert!( Arc::ptr_eq( &before, &after ) );
        assert_eq!( *calls.lock().unwrap(), vec![ "play /a" ] );
    }


    #[test]
    fn test_failed_playlist_add_keeps_error_state() {
        let bus = Arc::new( EventBus::new() );
        let ( player, calls ) = test_player( &bus, Capabilities::all() );
        let playlist = Arc::new( SimplePlaylist::with_name_limit( "pl", 0 ) );
        player.set_playlist( Some( playlist.clone() ) );
        playlist.add( Some( "a" ), None, "/a", None, false ).unwrap();
        player.status().set_error( "stream lost" );

        assert!( matches!( player.add( "/a", Some( "a" ), None ), Err( PlayerError::Playlist( _ ) ) ) );
        assert_eq!( player.status().state(), PlayerState::Error );
        assert!( calls.lock().unwrap().is_empty() );
    }


    #[test]
    fn test_add_clears_error_state() {
        let bus = Arc::new( EventBus::new() );
        let ( player, calls ) = test_player( &bus, Capabilities::all() );
        player.status().set_error( "stream lost" );

        player.add( "/b", None, None ).unwrap();

        assert_eq!( player.status().state(), PlayerState::None );
        assert_eq!( *calls.lock().unwrap(), vec![ "add /b" ] );
    }


    #[test]
    fn test_error_during_state_change_is_kept() {
        let bus = Arc::new( EventBus::new() );
        let player = Player::new( "p2", "Failing", Capabilities::all(), Box::new( FailingBackend::default() ), bus );
        player.play( "/a", None, None, false ).unwrap();
        player.status().set_state( PlayerState::Playing );

        assert!( matches!( player.set_state( PlayerState::Paused ), Err( PlayerError::Errored ) ) );

        let ( status, _ ) = player.get_status();
        assert_eq!( status.state, PlayerState::Error );
        assert_eq!( status.error_message.as_deref(), Some( "device lost" ) );
    }


    #[test]
    fn test_next_without_play_capability_keeps_current() {
        let bus = Arc::new( EventBus::new() );
        let capabilities = Capabilities { play: false, ..Capabilities::all() };
        let ( player, _ ) = test_player( &bus, capabilities );
        let playlist = Arc::new( SimplePlaylist::new( "pl" ) );
        player.set_playlist( Some( playlist.clone() ) );
        playlist.add( Some( "one" ), None, "/1", None, true ).unwrap();
        playlist.add( Some( "two" ), None, "/2", None, false ).unwrap();

        assert!( matches!( player.next(), Err( PlayerError::Unsupported( "play" ) ) ) );
        assert_eq!( playlist.get_list( Default::default() ).current.as_deref(), Some( "one" ) );
    }
}
