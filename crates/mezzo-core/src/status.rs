//! Player state machine and status snapshot
//!
//! Every player owns one `PlayerStatus`. Each mutation builds a new
//! `StatusSnapshot`, swaps it in under the status lock, and then publishes the
//! matching event once that lock is released. A snapshot handed out by
//! `get_status` is never modified afterwards, so readers always see a
//! consistent multi-field view.

use std::fmt;
use std::str::FromStr;
use std::sync::{ Arc, Mutex };
use std::time::Instant;

use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::event::{ Event, EventBus, PlayerEvent };
use crate::sync::lock;
use crate::tags::Tags;


/// Error returned when parsing an unknown state name.
#[derive( Debug, Clone, PartialEq, Eq, Error )]
#[error( "Unknown player state: {0}" )]
pub struct UnknownState( pub String );


/// Current state of a player.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize )]
#[serde( rename_all = "snake_case" )]
pub enum PlayerState {
    /// No media loaded
    #[default]
    None,
    /// Media is being opened (its details are not known yet)
    Loading,
    /// Media is loaded, waiting for enough data to play
    Buffering,
    Playing,
    /// Loading, but playback should stay paused once ready
    PausedLoading,
    /// Buffering, but playback should stay paused once ready
    PausedBuffering,
    Paused,
    Stopped,
    /// A backend failure occurred; cleared by the next add/load/play
    Error,
}


impl PlayerState {
    /// All states, in declaration order.
    pub const ALL: [PlayerState; 9] = [
        PlayerState::None,
        PlayerState::Loading,
        PlayerState::Buffering,
        PlayerState::Playing,
        PlayerState::PausedLoading,
        PlayerState::PausedBuffering,
        PlayerState::Paused,
        PlayerState::Stopped,
        PlayerState::Error,
    ];


    /// Returns the wire name of the state.
    pub fn as_str( &self ) -> &'static str {
        match self {
            PlayerState::None => "none",
            PlayerState::Loading => "loading",
            PlayerState::Buffering => "buffering",
            PlayerState::Playing => "playing",
            PlayerState::PausedLoading => "paused_loading",
            PlayerState::PausedBuffering => "paused_buffering",
            PlayerState::Paused => "paused",
            PlayerState::Stopped => "stopped",
            PlayerState::Error => "error",
        }
    }


    /// Returns true for the buffering states, where `buffer_percent` applies.
    pub fn is_buffering( &self ) -> bool {
        matches!( self, PlayerState::Buffering | PlayerState::PausedBuffering )
    }


    /// Resolves a requested state against the current one.
    ///
    /// Pausing while the media is still loading or buffering keeps the
    /// pending preparation and records the pause intent; resuming from one of
    /// those paused variants drops the intent again.
    ///
    /// @param requested - The state asked for by a client
    ///
    /// @returns The state the player should actually enter
    pub fn resolve( self, requested: PlayerState ) -> PlayerState {
        match ( self, requested ) {
            ( PlayerState::Loading, PlayerState::Paused ) => PlayerState::PausedLoading,
            ( PlayerState::Buffering, PlayerState::Paused ) => PlayerState::PausedBuffering,
            ( PlayerState::PausedLoading, PlayerState::Playing ) => PlayerState::Loading,
            ( PlayerState::PausedBuffering, PlayerState::Playing ) => PlayerState::Buffering,
            ( PlayerState::PausedLoading, PlayerState::Paused )
            | ( PlayerState::PausedBuffering, PlayerState::Paused ) => self,
            _ => requested,
        }
    }
}


impl fmt::Display for PlayerState {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( self.as_str() )
    }
}


impl FromStr for PlayerState {
    type Err = UnknownState;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        PlayerState::ALL
            .into_iter()
            .find( |state| state.as_str() == s )
            .ok_or_else( || UnknownState( s.to_string() ) )
    }
}


/// Observable status of a player at one point in time.
#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct StatusSnapshot {
    pub state: PlayerState,

    /// Buffering progress (0-100), meaningful in buffering states only
    pub buffer_percent: u32,

    #[serde( rename = "pos" )]
    pub position_ms: u64,

    #[serde( rename = "duration" )]
    pub duration_ms: u64,

    pub has_prev: bool,
    pub has_next: bool,

    /// Volume level (0.0 to 1.0)
    pub volume: f64,
    pub mute: bool,

    #[serde( rename = "name" )]
    pub media_name: Option<String>,

    #[serde( rename = "error" )]
    pub error_message: Option<String>,

    pub tags: Option<Arc<Tags>>,
}


impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            state: PlayerState::None,
            buffer_percent: 0,
            position_ms: 0,
            duration_ms: 0,
            has_prev: false,
            has_next: false,
            volume: 1.0,
            mute: false,
            media_name: None,
            error_message: None,
            tags: None,
        }
    }
}


struct StatusCell {
    snapshot: Arc<StatusSnapshot>,
    timestamp: u64,
}


/// Live status of one player.
///
/// Field updates happen under `cell`; `order` is held from the update until
/// the event has been delivered so that subscribers see one player's events in
/// mutation order. Only this type takes `order`.
///
/// Because `order` is held while subscribers run, an event callback must
/// never call a setter of the status that published the event (nor any
/// `Player` command that ends in one): the lock is not reentrant and the call
/// deadlocks. Callbacks that need to react should hand the work to another
/// thread.
pub struct PlayerStatus {
    id: Arc<str>,
    bus: Arc<EventBus>,
    cell: Mutex<StatusCell>,
    order: Mutex<()>,
    epoch: Instant,
}


impl PlayerStatus {
    /// Creates the status of player `id`, publishing on `bus`.
    pub fn new( id: &str, bus: Arc<EventBus> ) -> Self {
        Self {
            id: Arc::from( id ),
            bus,
            cell: Mutex::new( StatusCell {
                snapshot: Arc::new( StatusSnapshot::default() ),
                timestamp: 0,
            }),
            order: Mutex::new( () ),
            epoch: Instant::now(),
        }
    }


    /// Returns the ID of the owning player.
    pub fn player_id( &self ) -> &str {
        &self.id
    }


    /// Returns the current snapshot and the time of its last update.
    ///
    /// The timestamp is in microseconds since the status was created and
    /// strictly increases with every mutation.
    pub fn get_status( &self ) -> ( Arc<StatusSnapshot>, u64 ) {
        let cell = lock( &self.cell );
        ( Arc::clone( &cell.snapshot ), cell.timestamp )
    }


    /// Returns the current snapshot.
    pub fn snapshot( &self ) -> Arc<StatusSnapshot> {
        Arc::clone( &lock( &self.cell ).snapshot )
    }


    /// Returns the time of the last update.
    pub fn timestamp( &self ) -> u64 {
        lock( &self.cell ).timestamp
    }


    pub fn state( &self ) -> PlayerState {
        lock( &self.cell ).snapshot.state
    }


    pub fn position( &self ) -> u64 {
        lock( &self.cell ).snapshot.position_ms
    }


    pub fn volume( &self ) -> f64 {
        lock( &self.cell ).snapshot.volume
    }


    pub fn mute( &self ) -> bool {
        lock( &self.cell ).snapshot.mute
    }


    pub fn media_name( &self ) -> Option<String> {
        lock( &self.cell ).snapshot.media_name.clone()
    }


    pub fn tags( &self ) -> Option<Arc<Tags>> {
        lock( &self.cell ).snapshot.tags.clone()
    }


    /// Replaces the status with a fresh one for newly loading media.
    ///
    /// Volume and mute carry over. `Error` is refused; use `set_error`.
    ///
    /// @returns false if `state` is `Error`
    pub fn reset( &self, state: PlayerState, name: Option<&str>, tags: Option<Arc<Tags>> ) -> bool {
        if state == PlayerState::Error {
            return false;
        }

        let _order = lock( &self.order );
        let ( _, snapshot ) = self.update( |s| {
            *s = StatusSnapshot {
                state,
                volume: s.volume,
                mute: s.mute,
                has_prev: s.has_prev,
                has_next: s.has_next,
                media_name: name.map( str::to_string ),
                tags,
                ..StatusSnapshot::default()
            };
        });
        self.emit( PlayerEvent::Status( snapshot ) );
        true
    }


    /// Moves to a new state.
    ///
    /// Emits a state event only if the state actually changed.
    ///
    /// @returns The previous state
    pub fn set_state( &self, state: PlayerState ) -> PlayerState {
        let _order = lock( &self.order );
        let ( previous, _ ) = self.update( |s| std::mem::replace( &mut s.state, state ) );
        if previous != state {
            self.emit( PlayerEvent::State( state ) );
        }
        previous
    }


    /// Moves to a new state unless the player is in `Error`.
    ///
    /// The check and the update are atomic with respect to every other
    /// setter, so an error reported meanwhile is never overwritten.
    ///
    /// @returns The previous state, or `None` if nothing changed because of
    /// an error
    pub fn set_state_unless_error( &self, state: PlayerState ) -> Option<PlayerState> {
        let _order = lock( &self.order );
        if lock( &self.cell ).snapshot.state == PlayerState::Error {
            return None;
        }

        let ( previous, _ ) = self.update( |s| std::mem::replace( &mut s.state, state ) );
        if previous != state {
            self.emit( PlayerEvent::State( state ) );
        }
        Some( previous )
    }


    /// Updates the state and buffering percentage together.
    pub fn set_buffering( &self, state: PlayerState, percent: u32 ) {
        let percent = percent.min( 100 );
        let _order = lock( &self.order );
        self.update( |s| {
            s.state = state;
            s.buffer_percent = percent;
        });
        self.emit( PlayerEvent::Buffering { state, percent } );
    }


    /// Updates the position in the media (in ms).
    pub fn set_position( &self, position_ms: u64 ) {
        let _order = lock( &self.order );
        self.update( |s| s.position_ms = position_ms );
        self.emit( PlayerEvent::Seek( position_ms ) );
    }


    /// Updates the media duration (in ms).
    pub fn set_duration( &self, duration_ms: u64 ) {
        let _order = lock( &self.order );
        self.update( |s| s.duration_ms = duration_ms );
        self.emit( PlayerEvent::Duration( duration_ms ) );
    }


    /// Updates the previous/next availability flags.
    pub fn set_playlist_flags( &self, has_prev: bool, has_next: bool ) {
        let _order = lock( &self.order );
        self.update( |s| {
            s.has_prev = has_prev;
            s.has_next = has_next;
        });
        self.emit( PlayerEvent::Playlist { has_prev, has_next } );
    }


    /// Updates the volume, clamped to 0.0-1.0.
    pub fn set_volume( &self, volume: f64 ) {
        let volume = volume.clamp( 0.0, 1.0 );
        let _order = lock( &self.order );
        self.update( |s| s.volume = volume );
        self.emit( PlayerEvent::Volume( volume ) );
    }


    pub fn set_mute( &self, mute: bool ) {
        let _order = lock( &self.order );
        self.update( |s| s.mute = mute );
        self.emit( PlayerEvent::Mute( mute ) );
    }


    /// Updates the display name of the current media.
    pub fn set_name( &self, name: Option<&str> ) {
        let name = name.map( str::to_string );
        let _order = lock( &self.order );
        self.update( |s| s.media_name = name.clone() );
        self.emit( PlayerEvent::Name( name ) );
    }


    /// Records a backend failure and moves to the `Error` state.
    pub fn set_error( &self, message: &str ) {
        tracing::warn!( "Player {}: {}", self.id, message );

        let _order = lock( &self.order );
        let ( previous, _ ) = self.update( |s| {
            s.error_message = Some( message.to_string() );
            std::mem::replace( &mut s.state, PlayerState::Error )
        });
        self.emit( PlayerEvent::Error( message.to_string() ) );
        if previous != PlayerState::Error {
            self.emit( PlayerEvent::State( PlayerState::Error ) );
        }
    }


    pub fn set_tags( &self, tags: Option<Arc<Tags>> ) {
        let _order = lock( &self.order );
        self.update( |s| s.tags = tags.clone() );
        self.emit( PlayerEvent::Tags( tags ) );
    }


    /// Applies `f` to a copy of the current snapshot and swaps it in.
    fn update<R>( &self, f: impl FnOnce( &mut StatusSnapshot ) -> R ) -> ( R, Arc<StatusSnapshot> ) {
        let mut cell = lock( &self.cell );
        let mut next = StatusSnapshot::clone( &cell.snapshot );
        let out = f( &mut next );

        let now = self.epoch.elapsed().as_micros() as u64;
        cell.timestamp = now.max( cell.timestamp + 1 );
        cell.snapshot = Arc::new( next );

        ( out, Arc::clone( &cell.snapshot ) )
    }


    fn emit( &self, event: PlayerEvent ) {
        self.bus.publish( &self.id, Event::Player( event ) );
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn recording_status() -> ( PlayerStatus, Arc<Mutex<Vec<Event>>> ) {
        let bus = Arc::new( EventBus::new() );
        let events = Arc::new( Mutex::new( Vec::new() ) );
        let events_clone = Arc::clone( &events );
        bus.register( move |_, _, event| events_clone.lock().unwrap().push( event.clone() ) );
        ( PlayerStatus::new( "p1", bus ), events )
    }


    fn state_events( events: &Mutex<Vec<Event>> ) -> usize {
        events.lock().unwrap().iter()
            .filter( |e| matches!( e, Event::Player( PlayerEvent::State( _ ) ) ) )
            .count()
    }


    #[test]
    fn test_state_string_round_trip() {
        for state in PlayerState::ALL {
            assert_eq!( state.as_str().parse::<PlayerState>().unwrap(), state );
        }
        assert!( "dancing".parse::<PlayerState>().is_err() );
    }


    #[test]
    fn test_set_state_emits_once_per_transition() {
        for from in PlayerState::ALL {
            for to in PlayerState::ALL {
                if from == to {
                    continue;
                }
                let ( status, events ) = recording_status();
                status.set_state( from );
                events.lock().unwrap().clear();

                let previous = status.set_state( to );

                assert_eq!( previous, from );
                assert_eq!( state_events( &events ), 1 );
                assert_eq!( status.get_status().0.state, to );
            }
        }
    }


    #[test]
    fn test_set_state_same_state_is_silent() {
        let ( status, events ) = recording_status();
        status.set_state( PlayerState::Playing );
        events.lock().unwrap().clear();

        assert_eq!( status.set_state( PlayerState::Playing ), PlayerState::Playing );
        assert_eq!( state_events( &events ), 0 );
    }


    #[test]
    fn test_unconditional_setters_always_emit() {
        let ( status, events ) = recording_status();
        status.set_volume( 0.5 );
        status.set_volume( 0.5 );
        status.set_mute( false );

        let events = events.lock().unwrap();
        assert_eq!( events.len(), 3 );
        assert_eq!( events[ 0 ], Event::Player( PlayerEvent::Volume( 0.5 ) ) );
        assert_eq!( events[ 2 ], Event::Player( PlayerEvent::Mute( false ) ) );
    }


    #[test]
    fn test_timestamp_stable_without_mutation() {
        let ( status, _ ) = recording_status();
        status.set_position( 100 );

        let ( _, first ) = status.get_status();
        let ( _, second ) = status.get_status();
        assert_eq!( first, second );
    }


    #[test]
    fn test_timestamp_increases_on_mutation() {
        let ( status, _ ) = recording_status();
        let ( _, mut last ) = status.get_status();

        for pos in 0..50 {
            status.set_position( pos );
            let ( _, now ) = status.get_status();
            assert!( now > last );
            last = now;
        }
    }


    #[test]
    fn test_published_snapshot_is_not_mutated() {
        let ( status, _ ) = recording_status();
        status.set_volume( 0.8 );
        let ( before, _ ) = status.get_status();

        status.set_volume( 0.2 );

        assert_eq!( before.volume, 0.8 );
        assert_eq!( status.get_status().0.volume, 0.2 );
    }


    #[test]
    fn test_reset_refuses_error_state() {
        let ( status, events ) = recording_status();
        assert!( !status.reset( PlayerState::Error, Some( "x" ), None ) );
        assert!( events.lock().unwrap().is_empty() );
        assert_eq!( status.state(), PlayerState::None );
    }


    #[test]
    fn test_reset_keeps_volume_and_clears_media_fields() {
        let ( status, events ) = recording_status();
        status.set_volume( 0.3 );
        status.set_position( 5000 );
        status.set_error( "broken pipe" );

        assert!( status.reset( PlayerState::Loading, Some( "Track" ), None ) );

        let ( snapshot, _ ) = status.get_status();
        assert_eq!( snapshot.state, PlayerState::Loading );
        assert_eq!( snapshot.volume, 0.3 );
        assert_eq!( snapshot.position_ms, 0 );
        assert_eq!( snapshot.error_message, None );
        assert_eq!( snapshot.media_name.as_deref(), Some( "Track" ) );
        assert!( matches!(
            events.lock().unwrap().last(),
            Some( Event::Player( PlayerEvent::Status( _ ) ) )
        ));
    }


    #[test]
    fn test_set_error_moves_to_error_state() {
        let ( status, events ) = recording_status();
        status.set_state( PlayerState::Playing );
        status.set_error( "decoder failed" );

        let snapshot = status.snapshot();
        assert_eq!( snapshot.state, PlayerState::Error );
        assert_eq!( snapshot.error_message.as_deref(), Some( "decoder failed" ) );

        let events = events.lock().unwrap();
        assert_eq!( events[ 1 ], Event::Player( PlayerEvent::Error( "decoder failed".into() ) ) );
        assert_eq!( events[ 2 ], Event::Player( PlayerEvent::State( PlayerState::Error ) ) );
    }


    #[test]
    fn test_buffering_percent_clamped() {
        let ( status, _ ) = recording_status();
        status.set_buffering( PlayerState::Buffering, 250 );
        let snapshot = status.snapshot();
        assert_eq!( snapshot.buffer_percent, 100 );
        assert!( snapshot.state.is_buffering() );
    }


    #[test]
    fn test_resolve_keeps_pause_intent() {
        assert_eq!( PlayerState::Loading.resolve( PlayerState::Paused ), PlayerState::PausedLoading );
        assert_eq!( PlayerState::Buffering.resolve( PlayerState::Paused ), PlayerState::PausedBuffering );
        assert_eq!( PlayerState::PausedLoading.resolve( PlayerState::Playing ), PlayerState::Loading );
        assert_eq!( PlayerState::PausedBuffering.resolve( PlayerState::Playing ), PlayerState::Buffering );
        assert_eq!( PlayerState::Playing.resolve( PlayerState::Paused ), PlayerState::Paused );
        assert_eq!( PlayerState::Loading.resolve( PlayerState::Stopped ), PlayerState::Stopped );
    }


    #[test]
    fn test_concurrent_events_follow_mutation_order() {
        let bus = Arc::new( EventBus::new() );
        let seen = Arc::new( Mutex::new( Vec::new() ) );
        let seen_clone = Arc::clone( &seen );
        bus.register( move |_, _, event| {
            if let Event::Player( PlayerEvent::Seek( pos ) ) = event {
                seen_clone.lock().unwrap().push( *pos );
            }
        });
        let status = Arc::new( PlayerStatus::new( "p1", bus ) );

        let handles: Vec<_> = ( 0..4u64 )
            .map( |t| {
                let status = Arc::clone( &status );
                std::thread::spawn( move || {
                    for i in 0..100 {
                        status.set_position( t * 1000 + i );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!( seen.len(), 400 );
        assert_eq!( *seen.last().unwrap(), status.position() );
        for t in 0..4u64 {
            let per_thread: Vec<_> = seen.iter().filter( |p| **p / 1000 == t ).collect();
            assert!( per_thread.windows( 2 ).all( |w| w[ 0 ] < w[ 1 ] ) );
        }
    }


    #[test]
    fn test_set_state_unless_error_keeps_error() {
        let ( status, events ) = recording_status();
        status.set_state( PlayerState::Playing );
        assert_eq!( status.set_state_unless_error( PlayerState::Paused ), Some( PlayerState::Playing ) );

        status.set_error( "device lost" );
        let ( _, timestamp ) = status.get_status();
        events.lock().unwrap().clear();

        assert_eq!( status.set_state_unless_error( PlayerState::Playing ), None );
        assert_eq!( status.state(), PlayerState::Error );
        assert_eq!( status.get_status().1, timestamp );
        assert!( events.lock().unwrap().is_empty() );
    }
}
