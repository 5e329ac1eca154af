//! Entity registry
//!
//! Holds every module, player, playlist and browser by ID. A `Registry` is
//! constructed once and shared by `Arc` with whoever needs lookups; dropping
//! the last handle (or calling `clear`) tears everything down.

use std::sync::{ Arc, Mutex };

use serde::Serialize;
use thiserror::Error;

use crate::browser::Browser;
use crate::event::{ BrowserEvent, Event, EventBus, ModuleEvent, PlayerEvent, PlaylistEvent };
use crate::player::Player;
use crate::playlist::Playlist;
use crate::sync::lock;


/// Errors that can occur when registering an entity.
#[derive( Debug, Error )]
pub enum RegistryError {
    #[error( "A {kind} with ID '{id}' is already registered" )]
    Duplicate { kind: &'static str, id: String },
}


/// Description of a module as exposed to clients.
#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}


/// ID-keyed list of shared entities, in registration order.
struct Catalog<T: ?Sized> {
    kind: &'static str,
    entries: Mutex<Vec<( String, Arc<T> )>>,
}


impl<T: ?Sized> Catalog<T> {
    fn new( kind: &'static str ) -> Self {
        Self { kind, entries: Mutex::new( Vec::new() ) }
    }


    fn insert( &self, id: &str, entity: Arc<T> ) -> Result<(), RegistryError> {
        let mut entries = lock( &self.entries );
        if entries.iter().any( |( key, _ )| key == id ) {
            return Err( RegistryError::Duplicate { kind: self.kind, id: id.to_string() } );
        }
        entries.push(( id.to_string(), entity ));
        Ok(())
    }


    fn remove( &self, id: &str ) -> Option<Arc<T>> {
        let mut entries = lock( &self.entries );
        let index = entries.iter().position( |( key, _ )| key == id )?;
        Some( entries.remove( index ).1 )
    }


    fn get( &self, id: &str ) -> Option<Arc<T>> {
        lock( &self.entries ).iter()
            .find( |( key, _ )| key == id )
            .map( |( _, entity )| Arc::clone( entity ) )
    }


    fn list( &self ) -> Vec<Arc<T>> {
        lock( &self.entries ).iter().map( |( _, entity )| Arc::clone( entity ) ).collect()
    }


    fn entries( &self ) -> Vec<( String, Arc<T> )> {
        lock( &self.entries ).iter()
            .map( |( key, entity )| ( key.clone(), Arc::clone( entity ) ) )
            .collect()
    }


    fn drain( &self ) -> Vec<( String, Arc<T> )> {
        std::mem::take( &mut *lock( &self.entries ) )
    }
}


/// Process registry of every live entity.
///
/// Each catalog has its own lock, which is never held while publishing or
/// while a caller uses a returned handle.
pub struct Registry {
    bus: Arc<EventBus>,
    modules: Catalog<ModuleInfo>,
    players: Catalog<Player>,
    playlists: Catalog<dyn Playlist>,
    browsers: Catalog<dyn Browser>,
}


impl Registry {
    pub fn new( bus: Arc<EventBus> ) -> Self {
        Self {
            bus,
            modules: Catalog::new( "module" ),
            players: Catalog::new( "player" ),
            playlists: Catalog::new( "playlist" ),
            browsers: Catalog::new( "browser" ),
        }
    }


    /// Returns the bus entities publish on.
    pub fn bus( &self ) -> &Arc<EventBus> {
        &self.bus
    }


    pub fn add_module( &self, id: &str, info: ModuleInfo ) -> Result<(), RegistryError> {
        self.modules.insert( id, Arc::new( info.clone() ) )?;
        tracing::info!( "Module {} registered", id );
        self.bus.publish( id, Event::Module( ModuleEvent::New( info ) ) );
        Ok(())
    }


    pub fn remove_module( &self, id: &str ) -> bool {
        if self.modules.remove( id ).is_none() {
            return false;
        }
        tracing::info!( "Module {} removed", id );
        self.bus.publish( id, Event::Module( ModuleEvent::Delete ) );
        true
    }


    pub fn modules( &self ) -> Vec<( String, ModuleInfo )> {
        self.modules.entries().into_iter()
            .map( |( id, info )| ( id, ModuleInfo::clone( &info ) ) )
            .collect()
    }


    /// Registers a player and announces it with PLAYER NEW.
    pub fn add_player( &self, player: Arc<Player> ) -> Result<(), RegistryError> {
        let id = player.id().to_string();
        let info = player.info();
        self.players.insert( &id, player )?;
        tracing::info!( "Player {} registered", id );
        self.bus.publish( &id, Event::Player( PlayerEvent::New( info ) ) );
        Ok(())
    }


    /// Unregisters a player and announces it with PLAYER DELETE.
    pub fn remove_player( &self, id: &str ) -> Option<Arc<Player>> {
        let player = self.players.remove( id )?;
        tracing::info!( "Player {} removed", id );
        self.bus.publish( id, Event::Player( PlayerEvent::Delete ) );
        Some( player )
    }


    pub fn get_player( &self, id: &str ) -> Option<Arc<Player>> {
        self.players.get( id )
    }


    pub fn players( &self ) -> Vec<Arc<Player>> {
        self.players.list()
    }


    pub fn add_playlist( &self, playlist: Arc<dyn Playlist> ) -> Result<(), RegistryError> {
        let id = playlist.id().to_string();
        self.playlists.insert( &id, playlist )?;
        tracing::info!( "Playlist {} registered", id );
        self.bus.publish( &id, Event::Playlist( PlaylistEvent::New ) );
        Ok(())
    }


    pub fn remove_playlist( &self, id: &str ) -> Option<Arc<dyn Playlist>> {
        let playlist = self.playlists.remove( id )?;
        tracing::info!( "Playlist {} removed", id );
        self.bus.publish( id, Event::Playlist( PlaylistEvent::Delete ) );
        Some( playlist )
    }


    pub fn get_playlist( &self, id: &str ) -> Option<Arc<dyn Playlist>> {
        self.playlists.get( id )
    }


    pub fn playlists( &self ) -> Vec<Arc<dyn Playlist>> {
        self.playlists.list()
    }


    pub fn add_browser( &self, id: &str, browser: Arc<dyn Browser> ) -> Result<(), RegistryError> {
        let info = browser.info();
        self.browsers.insert( id, browser )?;
        tracing::info!( "Browser {} registered", id );
        self.bus.publish( id, Event::Browser( BrowserEvent::New( info ) ) );
        Ok(())
    }


    pub fn remove_browser( &self, id: &str ) -> Option<Arc<dyn Browser>> {
        let browser = self.browsers.remove( id )?;
        tracing::info!( "Browser {} removed", id );
        self.bus.publish( id, Event::Browser( BrowserEvent::Delete ) );
        Some( browser )
    }


    pub fn get_browser( &self, id: &str ) -> Option<Arc<dyn Browser>> {
        self.browsers.get( id )
    }


    /// Returns every browser with its ID.
    pub fn browsers( &self ) -> Vec<( String, Arc<dyn Browser> )> {
        self.browsers.entries()
    }


    /// Unregisters everything, publishing DELETE for each entity.
    ///
    /// Players are detached from their playlists first so that no reference
    /// cycle outlives the registry.
    pub fn clear( &self ) {
        for ( id, player ) in self.players.drain() {
            player.set_playlist( None );
            self.bus.publish( &id, Event::Player( PlayerEvent::Delete ) );
        }
        for ( id, playlist ) in self.playlists.drain() {
            playlist.set_player( std::sync::Weak::<Player>::new() );
            self.bus.publish( &id, Event::Playlist( PlaylistEvent::Delete ) );
        }
        for ( id, _ ) in self.browsers.drain() {
            self.bus.publish( &id, Event::Browser( BrowserEvent::Delete ) );
        }
        for ( id, _ ) in self.modules.drain() {
            self.bus.publish( &id, Event::Module( ModuleEvent::Delete ) );
        }
        tracing::info!( "Registry cleared" );
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::browser::FileBrowser;
    use crate::player::tests::test_player;
    use crate::player::Capabilities;
    use crate::simple_playlist::SimplePlaylist;


    fn recording_bus() -> ( Arc<EventBus>, Arc<Mutex<Vec<String>>> ) {
        let bus = Arc::new( EventBus::new() );
        let log = Arc::new( Mutex::new( Vec::new() ) );
        let log_clone = Arc::clone( &log );
        bus.register( move |_, id, event| {
            log_clone.lock().unwrap().push( format!(
                "{} {} {}", event.event_type().as_str(), event.subtype(), id
            ));
        });
        ( bus, log )
    }


    #[test]
    fn test_player_lifecycle_events() {
        let ( bus, log ) = recording_bus();
        let registry = Registry::new( Arc::clone( &bus ) );
        let ( player, _ ) = test_player( &bus, Capabilities::all() );

        registry.add_player( Arc::clone( &player ) ).unwrap();
        assert!( Arc::ptr_eq( &registry.get_player( "p1" ).unwrap(), &player ) );
        assert!( matches!(
            registry.add_player( player ),
            Err( RegistryError::Duplicate { kind: "player", .. } )
        ));

        assert!( registry.remove_player( "p1" ).is_some() );
        assert!( registry.remove_player( "p1" ).is_none() );
        assert!( registry.get_player( "p1" ).is_none() );

        assert_eq!( *log.lock().unwrap(), vec![ "player new p1", "player delete p1" ] );
    }


    #[test]
    fn test_list_preserves_registration_order() {
        let bus = Arc::new( EventBus::new() );
        let registry = Registry::new( bus );
        for id in [ "b", "a", "c" ] {
            registry.add_playlist( Arc::new( SimplePlaylist::new( id ) ) ).unwrap();
        }
        let ids: Vec<_> = registry.playlists().iter().map( |p| p.id().to_string() ).collect();
        assert_eq!( ids, vec![ "b", "a", "c" ] );
    }


    #[test]
    fn test_clear_deletes_everything() {
        let ( bus, log ) = recording_bus();
        let registry = Registry::new( Arc::clone( &bus ) );
        let ( player, _ ) = test_player( &bus, Capabilities::all() );
        let playlist = Arc::new( SimplePlaylist::new( "pl" ) );
        player.set_playlist( Some( playlist.clone() ) );

        registry.add_module( "files", ModuleInfo {
            name: "Files".into(),
            description: "Local files".into(),
        }).unwrap();
        registry.add_player( Arc::clone( &player ) ).unwrap();
        registry.add_playlist( playlist.clone() ).unwrap();
        registry.add_browser( "files", Arc::new( FileBrowser::new( "/tmp" ) ) ).unwrap();
        log.lock().unwrap().clear();

        registry.clear();

        assert_eq!( *log.lock().unwrap(), vec![
            "player playlist p1",
            "player delete p1",
            "playlist delete pl",
            "browser delete files",
            "module delete files",
        ]);
        assert!( registry.players().is_empty() );
        assert!( player.playlist().is_none() );
        assert!( playlist.player().is_none() );
    }
}
