//! Clock-driven playback backend
//!
//! Plays media by advancing a position clock on an engine thread, without
//! producing audio. Local files are probed for their duration; a missing file
//! surfaces as an asynchronous error on the player status.

use std::path::Path;
use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::mpsc::{ self, RecvTimeoutError };
use std::sync::{ Arc, Mutex };
use std::thread::{ self, JoinHandle };
use std::time::{ Duration, Instant };

use mezzo_core::{ read_duration, PlaybackBackend, PlayerError, PlayerState, PlayerStatus };


/// Interval between position updates.
const TICK: Duration = Duration::from_millis( 250 );


/// Messages sent to the engine thread.
#[derive( Debug )]
enum EngineCommand {
    Open { path: String, start: bool, stopped: bool },
    SetState( PlayerState ),
    Seek( u64 ),
    Shutdown,
}


struct Engine {
    sender: mpsc::Sender<EngineCommand>,
    thread: JoinHandle<()>,
}


/// Backend whose engine thread reports into the player status.
#[derive( Default )]
pub struct LoopbackBackend {
    engine: Mutex<Option<Engine>>,
    position: Arc<AtomicU64>,
}


impl LoopbackBackend {
    pub fn new() -> Self {
        Self::default()
    }


    fn send( &self, command: EngineCommand ) {
        let engine = self.engine.lock().unwrap_or_else( |e| e.into_inner() );
        match engine.as_ref() {
            Some( engine ) => {
                if engine.sender.send( command ).is_err() {
                    tracing::warn!( "Playback engine is gone" );
                }
            }
            None => tracing::warn!( "Playback engine not attached" ),
        }
    }
}


impl PlaybackBackend for LoopbackBackend {
    fn attach( &self, status: Arc<PlayerStatus> ) {
        let ( sender, receiver ) = mpsc::channel();
        let position = Arc::clone( &self.position );

        let thread = thread::spawn( move || {
            EngineLoop::new( status, position ).run( receiver );
        });

        let mut engine = self.engine.lock().unwrap_or_else( |e| e.into_inner() );
        *engine = Some( Engine { sender, thread } );
    }


    fn add( &self, path: &str ) {
        tracing::debug!( "Queued {}", path );
    }


    fn load( &self, path: &str, stopped: bool ) {
        self.send( EngineCommand::Open { path: path.to_string(), start: false, stopped } );
    }


    fn play( &self, path: &str ) {
        self.send( EngineCommand::Open { path: path.to_string(), start: true, stopped: false } );
    }


    fn set_state( &self, state: PlayerState ) -> Result<PlayerState, PlayerError> {
        self.send( EngineCommand::SetState( state ) );
        Ok( state )
    }


    fn set_pos( &self, position_ms: u64 ) -> Result<u64, PlayerError> {
        self.position.store( position_ms, Ordering::Relaxed );
        self.send( EngineCommand::Seek( position_ms ) );
        Ok( position_ms )
    }


    fn position( &self ) -> Option<u64> {
        Some( self.position.load( Ordering::Relaxed ) )
    }
}


impl Drop for LoopbackBackend {
    fn drop( &mut self ) {
        let engine = self.engine.get_mut().unwrap_or_else( |e| e.into_inner() ).take();
        if let Some( engine ) = engine {
            let _ = engine.sender.send( EngineCommand::Shutdown );
            let _ = engine.thread.join();
        }
    }
}


/// State owned by the engine thread.
struct EngineLoop {
    status: Arc<PlayerStatus>,
    position: Arc<AtomicU64>,
    loaded: bool,
    playing: bool,
    duration_ms: Option<u64>,
    last_tick: Instant,
}


impl EngineLoop {
    fn new( status: Arc<PlayerStatus>, position: Arc<AtomicU64> ) -> Self {
        Self {
            status,
            position,
            loaded: false,
            playing: false,
            duration_ms: None,
            last_tick: Instant::now(),
        }
    }


    fn run( mut self, receiver: mpsc::Receiver<EngineCommand> ) {
        loop {
            match receiver.recv_timeout( TICK ) {
                Ok( EngineCommand::Shutdown ) | Err( RecvTimeoutError::Disconnected ) => break,
                Ok( command ) => self.handle( command ),
                Err( RecvTimeoutError::Timeout ) => {}
            }
            self.tick();
        }
        tracing::debug!( "Playback engine: exiting" );
    }


    fn handle( &mut self, command: EngineCommand ) {
        match command {
            EngineCommand::Open { path, start, stopped } => self.open( &path, start, stopped ),
            EngineCommand::SetState( state ) => {
                self.playing = self.loaded && state == PlayerState::Playing;
                if matches!( state, PlayerState::Stopped | PlayerState::None ) {
                    self.position.store( 0, Ordering::Relaxed );
                }
                if state == PlayerState::None {
                    self.loaded = false;
                    self.duration_ms = None;
                }
            }
            EngineCommand::Seek( position_ms ) => {
                let clamped = self.duration_ms.map_or( position_ms, |d| position_ms.min( d ) );
                self.position.store( clamped, Ordering::Relaxed );
            }
            EngineCommand::Shutdown => {}
        }
    }


    fn open( &mut self, path: &str, start: bool, stopped: bool ) {
        self.position.store( 0, Ordering::Relaxed );
        self.playing = false;
        self.loaded = false;

        let file = Path::new( path );
        if !file.exists() {
            self.status.set_error( &format!( "Cannot open {}", path ) );
            return;
        }

        self.duration_ms = read_duration( file ).unwrap_or_else( |e| {
            tracing::debug!( "No duration for {}: {}", path, e );
            None
        });
        if let Some( duration_ms ) = self.duration_ms {
            self.status.set_duration( duration_ms );
        }
        self.loaded = true;

        // A pause requested while loading is honoured once loaded
        let target = match self.status.state() {
            PlayerState::Loading if start => PlayerState::Playing,
            PlayerState::PausedLoading => PlayerState::Paused,
            _ if stopped => PlayerState::Stopped,
            other => other,
        };
        self.playing = target == PlayerState::Playing;
        self.status.set_state( target );
        tracing::info!( "Opened {} ({:?} ms)", path, self.duration_ms );
    }


    fn tick( &mut self ) {
        let now = Instant::now();
        let elapsed = now.duration_since( self.last_tick ).as_millis() as u64;
        self.last_tick = now;

        if !self.playing {
            return;
        }

        let position = self.position.load( Ordering::Relaxed ) + elapsed;
        match self.duration_ms {
            Some( duration_ms ) if position >= duration_ms => {
                self.position.store( duration_ms, Ordering::Relaxed );
                self.status.set_position( duration_ms );
                self.playing = false;
                self.status.set_state( PlayerState::Stopped );
                tracing::info!( "End of media" );
            }
            _ => {
                self.position.store( position, Ordering::Relaxed );
                self.status.set_position( position );
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use mezzo_core::{ Capabilities, EventBus, Player };


    fn wait_for( player: &Player, state: PlayerState ) -> bool {
        let deadline = Instant::now() + Duration::from_secs( 5 );
        while Instant::now() < deadline {
            if player.status().state() == state {
                return true;
            }
            thread::sleep( Duration::from_millis( 10 ) );
        }
        false
    }


    fn player() -> Arc<Player> {
        Player::new(
            "local",
            "Local",
            Capabilities::all(),
            Box::new( LoopbackBackend::new() ),
            Arc::new( EventBus::new() ),
        )
    }


    #[test]
    fn test_missing_file_reports_error() {
        let player = player();
        player.play( "/nonexistent/mezzo.flac", None, None, false ).unwrap();

        assert!( wait_for( &player, PlayerState::Error ) );
        let ( status, _ ) = player.get_status();
        assert!( status.error_message.as_deref().unwrap().contains( "Cannot open" ) );
    }


    #[test]
    fn test_existing_file_starts_playing() {
        let path = std::env::temp_dir().join( format!( "mezzo-backend-{}.raw", std::process::id() ) );
        std::fs::write( &path, b"" ).unwrap();
        let player = player();

        player.play( path.to_str().unwrap(), None, None, false ).unwrap();
        assert!( wait_for( &player, PlayerState::Playing ) );

        player.set_state( PlayerState::Paused ).unwrap();
        assert_eq!( player.status().state(), PlayerState::Paused );

        std::fs::remove_file( &path ).unwrap();
    }


    #[test]
    fn test_playback_reports_position_in_status() {
        let path = std::env::temp_dir().join( format!( "mezzo-backend-pos-{}.raw", std::process::id() ) );
        std::fs::write( &path, b"" ).unwrap();
        let player = player();

        player.play( path.to_str().unwrap(), None, None, false ).unwrap();
        assert!( wait_for( &player, PlayerState::Playing ) );

        let deadline = Instant::now() + Duration::from_secs( 5 );
        while player.get_status().0.position_ms == 0 && Instant::now() < deadline {
            thread::sleep( Duration::from_millis( 10 ) );
        }
        assert!( player.get_status().0.position_ms > 0 );

        std::fs::remove_file( &path ).unwrap();
    }


    #[test]
    fn test_seek_reports_position() {
        let player = player();
        assert_eq!( player.set_pos( 3_000 ).unwrap(), 3_000 );
        assert_eq!( player.get_pos(), 3_000 );
    }
}
