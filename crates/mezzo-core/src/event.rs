//! Event dispatcher
//!
//! Fans out typed state-change events to every registered subscriber.
//! Delivery is synchronous, on the publisher's thread, in registration order.

use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::{ Arc, Mutex };

use serde_json::{ json, Value };

use crate::browser::BrowserInfo;
use crate::player::PlayerInfo;
use crate::registry::ModuleInfo;
use crate::status::{ PlayerState, StatusSnapshot };
use crate::sync::lock;
use crate::tags::Tags;


/// Top-level event family.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub enum EventType {
    General,
    Module,
    Browser,
    Player,
    Playlist,
}


impl EventType {
    /// Returns the wire name of the event type.
    pub fn as_str( &self ) -> &'static str {
        match self {
            EventType::General => "general",
            EventType::Module => "module",
            EventType::Browser => "browser",
            EventType::Player => "player",
            EventType::Playlist => "playlist",
        }
    }
}


/// Module lifecycle events.
#[derive( Debug, Clone, PartialEq )]
pub enum ModuleEvent {
    New( ModuleInfo ),
    Delete,
}


/// Browser lifecycle events.
#[derive( Debug, Clone, PartialEq )]
pub enum BrowserEvent {
    New( BrowserInfo ),
    Delete,
}


/// Playlist lifecycle events.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum PlaylistEvent {
    New,
    Delete,
}


/// Player events. Each variant carries the fixed payload of its subtype.
#[derive( Debug, Clone, PartialEq )]
pub enum PlayerEvent {
    New( PlayerInfo ),
    Delete,
    Status( Arc<StatusSnapshot> ),
    State( PlayerState ),
    Buffering { state: PlayerState, percent: u32 },
    Seek( u64 ),
    Duration( u64 ),
    Playlist { has_prev: bool, has_next: bool },
    Volume( f64 ),
    Mute( bool ),
    Name( Option<String> ),
    Error( String ),
    Tags( Option<Arc<Tags>> ),
}


impl PlayerEvent {
    /// Returns the wire name of the subtype.
    pub fn subtype( &self ) -> &'static str {
        match self {
            PlayerEvent::New( _ ) => "new",
            PlayerEvent::Delete => "delete",
            PlayerEvent::Status( _ ) => "status",
            PlayerEvent::State( _ ) => "state",
            PlayerEvent::Buffering { .. } => "buffering",
            PlayerEvent::Seek( _ ) => "seek",
            PlayerEvent::Duration( _ ) => "duration",
            PlayerEvent::Playlist { .. } => "playlist",
            PlayerEvent::Volume( _ ) => "volume",
            PlayerEvent::Mute( _ ) => "mute",
            PlayerEvent::Name( _ ) => "name",
            PlayerEvent::Error( _ ) => "error",
            PlayerEvent::Tags( _ ) => "tags",
        }
    }


    fn data( &self ) -> Value {
        match self {
            PlayerEvent::New( info ) => serde_json::to_value( info ).unwrap_or( Value::Null ),
            PlayerEvent::Delete => Value::Null,
            PlayerEvent::Status( status ) => serde_json::to_value( &**status ).unwrap_or( Value::Null ),
            PlayerEvent::State( state ) => json!( state.as_str() ),
            PlayerEvent::Buffering { state, percent } => json!({
                "state": state.as_str(),
                "percent": percent,
            }),
            PlayerEvent::Seek( pos ) => json!( pos ),
            PlayerEvent::Duration( duration ) => json!( duration ),
            PlayerEvent::Playlist { has_prev, has_next } => json!({
                "has_prev": has_prev,
                "has_next": has_next,
            }),
            PlayerEvent::Volume( volume ) => json!( volume ),
            PlayerEvent::Mute( mute ) => json!( mute ),
            PlayerEvent::Name( name ) => json!( name ),
            PlayerEvent::Error( error ) => json!( error ),
            PlayerEvent::Tags( tags ) => serde_json::to_value( tags ).unwrap_or( Value::Null ),
        }
    }
}


/// A state-change notification.
#[derive( Debug, Clone, PartialEq )]
pub enum Event {
    /// Application-specific event with a free-form payload.
    General { name: String, data: Value },
    Module( ModuleEvent ),
    Browser( BrowserEvent ),
    Player( PlayerEvent ),
    Playlist( PlaylistEvent ),
}


impl Event {
    /// Returns the event family.
    pub fn event_type( &self ) -> EventType {
        match self {
            Event::General { .. } => EventType::General,
            Event::Module( _ ) => EventType::Module,
            Event::Browser( _ ) => EventType::Browser,
            Event::Player( _ ) => EventType::Player,
            Event::Playlist( _ ) => EventType::Playlist,
        }
    }


    /// Returns the wire name of the subtype.
    pub fn subtype( &self ) -> &str {
        match self {
            Event::General { name, .. } => name,
            Event::Module( ModuleEvent::New( _ ) )
            | Event::Browser( BrowserEvent::New( _ ) )
            | Event::Playlist( PlaylistEvent::New ) => "new",
            Event::Module( ModuleEvent::Delete )
            | Event::Browser( BrowserEvent::Delete )
            | Event::Playlist( PlaylistEvent::Delete ) => "delete",
            Event::Player( event ) => event.subtype(),
        }
    }


    /// Serializes the event for push delivery.
    ///
    /// Payloads use the same JSON shapes as the matching RPC queries.
    ///
    /// @param id - ID of the entity the event is about
    pub fn to_json( &self, id: &str ) -> Value {
        let data = match self {
            Event::General { data, .. } => data.clone(),
            Event::Module( ModuleEvent::New( info ) ) => {
                serde_json::to_value( info ).unwrap_or( Value::Null )
            }
            Event::Browser( BrowserEvent::New( info ) ) => {
                serde_json::to_value( info ).unwrap_or( Value::Null )
            }
            Event::Module( ModuleEvent::Delete )
            | Event::Browser( BrowserEvent::Delete )
            | Event::Playlist( _ ) => Value::Null,
            Event::Player( event ) => event.data(),
        };

        json!({
            "type": self.event_type().as_str(),
            "subtype": self.subtype(),
            "id": id,
            "data": data,
        })
    }
}


/// Handle identifying a registered subscriber.
#[derive( Debug, Clone, PartialEq, Eq, Hash )]
pub struct EventClient {
    id: u64,
}


impl EventClient {
    /// Returns the numeric client ID.
    pub fn id( &self ) -> u64 {
        self.id
    }
}


/// Subscriber callback: receives its own handle, the entity ID and the event.
///
/// Callbacks run with the bus lock held. They must return quickly and must
/// not call back into the bus (`register`, `unregister`, `publish`): doing so
/// deadlocks.
pub type EventCallback = Box<dyn Fn( &EventClient, &str, &Event ) + Send + Sync>;


struct Subscriber {
    client: EventClient,
    callback: EventCallback,
}


/// Process event bus.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}


impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new( Vec::new() ),
            next_id: AtomicU64::new( 1 ),
        }
    }


    /// Registers a new subscriber at the end of the delivery order.
    pub fn register<F>( &self, callback: F ) -> EventClient
    where
        F: Fn( &EventClient, &str, &Event ) + Send + Sync + 'static,
    {
        let client = EventClient { id: self.next_id.fetch_add( 1, Ordering::Relaxed ) };

        lock( &self.subscribers ).push( Subscriber {
            client: client.clone(),
            callback: Box::new( callback ),
        });

        tracing::debug!( "Event client {} registered", client.id );
        client
    }


    /// Removes a subscriber.
    ///
    /// @returns true if the client was registered
    pub fn unregister( &self, client: &EventClient ) -> bool {
        let removed = {
            let mut subscribers = lock( &self.subscribers );
            let before = subscribers.len();
            subscribers.retain( |s| s.client != *client );
            before != subscribers.len()
        };

        if removed {
            tracing::debug!( "Event client {} unregistered", client.id );
        }
        removed
    }


    /// Returns the number of registered subscribers.
    pub fn client_count( &self ) -> usize {
        lock( &self.subscribers ).len()
    }


    /// Delivers an event to every subscriber, in registration order.
    ///
    /// The event is dropped once, after the last callback returns.
    ///
    /// @param id - ID of the entity the event is about
    /// @param event - The event to deliver
    pub fn publish( &self, id: &str, event: Event ) {
        {
            let subscribers = lock( &self.subscribers );
            for subscriber in subscribers.iter() {
                ( subscriber.callback )( &subscriber.client, id, &event );
            }
        }
        drop( event );
    }
}


impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::status::StatusSnapshot;


    fn recorder( bus: &EventBus, tag: &'static str, log: &Arc<Mutex<Vec<String>>> ) -> EventClient {
        let log = Arc::clone( log );
        bus.register( move |_, id, event| {
            log.lock().unwrap().push( format!( "{}:{}:{}", tag, id, event.subtype() ) );
        })
    }


    #[test]
    fn test_publish_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new( Mutex::new( Vec::new() ) );
        recorder( &bus, "a", &log );
        recorder( &bus, "b", &log );

        bus.publish( "p1", Event::Player( PlayerEvent::Mute( true ) ) );

        assert_eq!( *log.lock().unwrap(), vec![ "a:p1:mute", "b:p1:mute" ] );
    }


    #[test]
    fn test_unregister_stops_delivery() {
        let bus = EventBus::new();
        let log = Arc::new( Mutex::new( Vec::new() ) );
        let a = recorder( &bus, "a", &log );
        recorder( &bus, "b", &log );

        assert!( bus.unregister( &a ) );
        assert!( !bus.unregister( &a ) );
        assert_eq!( bus.client_count(), 1 );

        bus.publish( "p1", Event::Player( PlayerEvent::Delete ) );
        assert_eq!( *log.lock().unwrap(), vec![ "b:p1:delete" ] );
    }


    #[test]
    fn test_callback_receives_own_handle() {
        let bus = EventBus::new();
        let seen = Arc::new( Mutex::new( None ) );
        let seen_clone = Arc::clone( &seen );
        let client = bus.register( move |c, _, _| {
            *seen_clone.lock().unwrap() = Some( c.id() );
        });

        bus.publish( "x", Event::Playlist( PlaylistEvent::New ) );
        assert_eq!( *seen.lock().unwrap(), Some( client.id() ) );
    }


    #[test]
    fn test_payload_released_after_delivery() {
        let bus = EventBus::new();
        let held = Arc::new( Mutex::new( 0usize ) );
        let held_clone = Arc::clone( &held );
        bus.register( move |_, _, event| {
            if let Event::Player( PlayerEvent::Status( status ) ) = event {
                *held_clone.lock().unwrap() = Arc::strong_count( status );
            }
        });

        let status = Arc::new( StatusSnapshot::default() );
        bus.publish( "p1", Event::Player( PlayerEvent::Status( Arc::clone( &status ) ) ) );

        assert_eq!( *held.lock().unwrap(), 2 );
        assert_eq!( Arc::strong_count( &status ), 1 );
    }


    #[test]
    fn test_event_json_shape() {
        let event = Event::Player( PlayerEvent::Buffering { state: PlayerState::Buffering, percent: 40 } );
        let value = event.to_json( "radio" );

        assert_eq!( value[ "type" ], "player" );
        assert_eq!( value[ "subtype" ], "buffering" );
        assert_eq!( value[ "id" ], "radio" );
        assert_eq!( value[ "data" ][ "state" ], "buffering" );
        assert_eq!( value[ "data" ][ "percent" ], 40 );
    }


    #[test]
    fn test_general_event_uses_name_as_subtype() {
        let event = Event::General { name: "reboot".into(), data: json!({ "delay": 5 }) };
        assert_eq!( event.event_type(), EventType::General );
        assert_eq!( event.subtype(), "reboot" );
        assert_eq!( event.to_json( "" )[ "data" ][ "delay" ], 5 );
    }
}
