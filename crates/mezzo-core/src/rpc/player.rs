//! `player.*` methods

use std::path::Path;
use std::sync::Arc;

use serde_json::{ json, Value };

use super::{ registry_method as method, to_value, Method, ParamSpec, Params, RegisterError, RpcError, RpcRegistry, ValueType };
use crate::player::Player;
use crate::probe::read_tags;
use crate::registry::Registry;
use crate::status::PlayerState;
use crate::tags::{ TagFields, Tags };


pub const NAMESPACE: &str = "player";


/// Player fields selectable in `player.get_list`.
#[derive( Debug, Clone, Copy, Default )]
struct ListFields {
    name: bool,
    playlist: bool,
    control: bool,
    status: bool,
}


impl ListFields {
    fn parse( names: Option<Vec<&str>> ) -> Self {
        let Some( names ) = names else {
            return Self { name: true, playlist: true, control: true, status: false };
        };

        names.into_iter().fold( Self::default(), |mut fields, name| {
            match name {
                "full" => return Self { name: true, playlist: true, control: true, status: true },
                "name" => fields.name = true,
                "playlist" => fields.playlist = true,
                "control" => fields.control = true,
                "status" => fields.status = true,
                _ => {}
            }
            fields
        })
    }
}


/// Registers the `player` namespace.
pub fn register( rpc: &RpcRegistry, registry: &Arc<Registry> ) -> Result<(), RegisterError> {
    rpc.register_methods( NAMESPACE, methods( registry ) )
}


/// Builds the `player` method table.
pub fn methods( registry: &Arc<Registry> ) -> Vec<Method> {
    use ValueType::*;

    let id = ParamSpec::required( "id", String );
    let fields = ParamSpec::optional( "fields", Array );
    let path = ParamSpec::required( "path", String );
    let name = ParamSpec::optional( "name", String );
    let insert = ParamSpec::optional( "insert", Boolean );

    vec![
        method( registry, "get_list", vec![ fields ], Array, get_list ),
        method( registry, "get_info", vec![ id ], Object, get_info ),
        method( registry, "get_status", vec![ id, fields ], Object, get_status ),
        method( registry, "add", vec![ id, path, name ], Boolean, add ),
        method(
            registry,
            "load",
            vec![ id, path, name, insert, ParamSpec::optional( "stopped", Boolean ) ],
            Boolean,
            load,
        ),
        method( registry, "play", vec![ id, path, name, insert ], Boolean, play ),
        method( registry, "set_state", vec![ id, ParamSpec::required( "state", String ) ], String, set_state ),
        method( registry, "prev", vec![ id ], Boolean, prev ),
        method( registry, "next", vec![ id ], Boolean, next ),
        method( registry, "set_pos", vec![ id, ParamSpec::required( "pos", Integer ) ], Integer, set_pos ),
        method( registry, "get_pos", vec![ id ], Integer, get_pos ),
        method( registry, "set_volume", vec![ id, ParamSpec::required( "volume", Number ) ], Number, set_volume ),
        method( registry, "set_mute", vec![ id, ParamSpec::required( "mute", Boolean ) ], Boolean, set_mute ),
    ]
}


/// Unregisters the `player` namespace.
pub fn unregister( rpc: &RpcRegistry ) -> usize {
    rpc.unregister_namespace( NAMESPACE )
}


fn lookup( registry: &Registry, params: &Params ) -> Result<Arc<Player>, RpcError> {
    let id = params.str( "id" )?;
    registry.get_player( id ).ok_or_else( || RpcError::NoPlayer( id.to_string() ) )
}


/// Reads embedded tags when `path` is a local file.
fn probe_tags( path: &str ) -> Option<Arc<Tags>> {
    let path = Path::new( path );
    if !path.is_file() {
        return None;
    }

    match read_tags( path ) {
        Ok( tags ) if !tags.is_empty() => Some( Arc::new( tags ) ),
        Ok( _ ) => None,
        Err( e ) => {
            tracing::debug!( "No tags for {}: {}", path.display(), e );
            None
        }
    }
}


fn status_json( player: &Player, fields: TagFields ) -> Result<Value, RpcError> {
    let ( snapshot, timestamp ) = player.get_status();
    let mut value = to_value( &*snapshot )?;

    if let Some( object ) = value.as_object_mut() {
        let tags = snapshot.tags.as_ref().map( |t| Tags::select( t, fields ) );
        object.insert( "tags".into(), to_value( &tags )? );
        object.insert( "timestamp".into(), json!( timestamp ) );
    }
    Ok( value )
}


fn get_list( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let fields = ListFields::parse( params.string_list( "fields" )? );

    registry.players().iter().map( |player| -> Result<Value, RpcError> {
        let info = player.info();
        let mut entry = json!({ "id": info.id });
        if fields.name {
            entry[ "name" ] = json!( info.name );
        }
        if fields.playlist {
            entry[ "playlist_id" ] = json!( info.playlist_id );
        }
        if fields.control {
            entry[ "control" ] = to_value( &info.control )?;
        }
        if fields.status {
            entry[ "status" ] = status_json( player, TagFields::FULL )?;
        }
        Ok( entry )
    })
    .collect::<Result<Vec<_>, _>>()
    .map( Value::Array )
}


fn get_info( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    to_value( &lookup( registry, params )?.info() )
}


fn get_status( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let player = lookup( registry, params )?;
    status_json( &player, params.tag_fields( "fields" )? )
}


fn add( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let player = lookup( registry, params )?;
    let path = params.str( "path" )?;
    player.add( path, params.opt_str( "name" )?, probe_tags( path ) )?;
    Ok( json!( true ) )
}


fn load( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let player = lookup( registry, params )?;
    let path = params.str( "path" )?;
    player.load(
        path,
        params.opt_str( "name" )?,
        probe_tags( path ),
        params.opt_bool( "insert" )?.unwrap_or( false ),
        params.opt_bool( "stopped" )?.unwrap_or( false ),
    )?;
    Ok( json!( true ) )
}


fn play( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let player = lookup( registry, params )?;
    let path = params.str( "path" )?;
    player.play(
        path,
        params.opt_str( "name" )?,
        probe_tags( path ),
        params.opt_bool( "insert" )?.unwrap_or( false ),
    )?;
    Ok( json!( true ) )
}


fn set_state( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let player = lookup( registry, params )?;
    let requested: PlayerState = params.str( "state" )?
        .parse()
        .map_err( |e: crate::status::UnknownState| RpcError::InvalidParams( e.to_string() ) )?;
    let entered = player.set_state( requested )?;
    Ok( json!( entered.as_str() ) )
}


fn prev( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    Ok( json!( lookup( registry, params )?.prev()? ) )
}


fn next( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    Ok( json!( lookup( registry, params )?.next()? ) )
}


fn set_pos( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let player = lookup( registry, params )?;
    Ok( json!( player.set_pos( params.u64( "pos" )? )? ) )
}


fn get_pos( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    Ok( json!( lookup( registry, params )?.get_pos() ) )
}


fn set_volume( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let player = lookup( registry, params )?;
    Ok( json!( player.set_volume( params.f64( "volume" )? )? ) )
}


fn set_mute( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let player = lookup( registry, params )?;
    Ok( json!( player.set_mute( params.bool( "mute" )? )? ) )
}


#[cfg( test )]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::event::{ Event, EventBus, PlayerEvent };
    use crate::player::tests::test_player;
    use crate::player::Capabilities;
    use crate::simple_playlist::SimplePlaylist;


    fn setup( capabilities: Capabilities ) -> ( RpcRegistry, Arc<Player>, Arc<Mutex<Vec<String>>> ) {
        let bus = Arc::new( EventBus::new() );
        let registry = Arc::new( Registry::new( Arc::clone( &bus ) ) );
        let ( player, calls ) = test_player( &bus, capabilities );
        player.set_playlist( Some( Arc::new( SimplePlaylist::new( "pl" ) ) ) );
        registry.add_player( Arc::clone( &player ) ).unwrap();

        let rpc = RpcRegistry::new();
        register( &rpc, &registry ).unwrap();
        ( rpc, player, calls )
    }


    #[test]
    fn test_get_list_default_fields() {
        let ( rpc, _, _ ) = setup( Capabilities::all() );
        let list = rpc.call( "player.get_list", None ).unwrap();
        assert_eq!( list[ 0 ][ "id" ], "p1" );
        assert_eq!( list[ 0 ][ "playlist_id" ], "pl" );
        assert_eq!( list[ 0 ][ "control" ][ "volume" ], true );
        assert!( list[ 0 ].get( "status" ).is_none() );

        let list = rpc.call( "player.get_list", Some( &json!({ "fields": [ "status" ] }) ) ).unwrap();
        assert!( list[ 0 ].get( "name" ).is_none() );
        assert_eq!( list[ 0 ][ "status" ][ "state" ], "none" );
    }


    #[test]
    fn test_play_and_get_status() {
        let ( rpc, _, calls ) = setup( Capabilities::all() );
        let result = rpc.call( "player.play", Some( &json!({
            "id": "p1", "path": "/music/x.flac", "name": "X", "insert": true
        }))).unwrap();
        assert_eq!( result, true );
        assert_eq!( *calls.lock().unwrap(), vec![ "play /music/x.flac" ] );

        let status = rpc.call( "player.get_status", Some( &json!({ "id": "p1" }) ) ).unwrap();
        assert_eq!( status[ "state" ], "loading" );
        assert_eq!( status[ "name" ], "X" );
        assert!( status[ "timestamp" ].as_u64().unwrap() > 0 );
    }


    #[test]
    fn test_set_state_parses_names() {
        let ( rpc, player, _ ) = setup( Capabilities::all() );
        player.status().set_state( PlayerState::Playing );

        let entered = rpc.call( "player.set_state", Some( &json!({ "id": "p1", "state": "paused" }) ) ).unwrap();
        assert_eq!( entered, "paused" );

        let err = rpc.call( "player.set_state", Some( &json!({ "id": "p1", "state": "flying" }) ) ).unwrap_err();
        assert_eq!( err.code(), -32602 );
    }


    #[test]
    fn test_set_volume_scenario() {
        let bus = Arc::new( EventBus::new() );
        let received = Arc::new( Mutex::new( Vec::new() ) );
        for client in [ 1, 2 ] {
            let received = Arc::clone( &received );
            bus.register( move |_, _, event| {
                if let Event::Player( PlayerEvent::Volume( v ) ) = event {
                    received.lock().unwrap().push(( client, *v ));
                }
            });
        }
        let registry = Arc::new( Registry::new( Arc::clone( &bus ) ) );
        let ( player, _ ) = test_player( &bus, Capabilities::all() );
        player.set_volume( 0.8 ).unwrap();
        registry.add_player( player ).unwrap();
        let rpc = RpcRegistry::new();
        register( &rpc, &registry ).unwrap();
        received.lock().unwrap().clear();

        let applied = rpc.call( "player.set_volume", Some( &json!({ "id": "p1", "volume": 0.5 }) ) ).unwrap();

        assert_eq!( applied, 0.5 );
        assert_eq!( *received.lock().unwrap(), vec![ ( 1, 0.5 ), ( 2, 0.5 ) ] );
        let status = rpc.call( "player.get_status", Some( &json!({ "id": "p1" }) ) ).unwrap();
        assert_eq!( status[ "volume" ], 0.5 );
    }


    #[test]
    fn test_lookup_and_capability_errors() {
        let ( rpc, _, _ ) = setup( Capabilities { volume: false, ..Capabilities::all() } );

        let err = rpc.call( "player.get_info", Some( &json!({ "id": "nope" }) ) ).unwrap_err();
        assert_eq!( err, RpcError::NoPlayer( "nope".into() ) );

        let err = rpc.call( "player.set_volume", Some( &json!({ "id": "p1", "volume": 0.1 }) ) ).unwrap_err();
        assert_eq!( err.code(), -32004 );

        let err = rpc.call( "player.set_volume", Some( &json!({ "id": "p1" }) ) ).unwrap_err();
        assert_eq!( err.code(), -32602 );
    }


    #[test]
    fn test_next_without_neighbour_returns_false() {
        let ( rpc, _, _ ) = setup( Capabilities::all() );
        assert_eq!( rpc.call( "player.next", Some( &json!([ "p1" ]) ) ).unwrap(), false );
    }


    #[test]
    fn test_unregister_removes_namespace() {
        let ( rpc, _, _ ) = setup( Capabilities::all() );
        assert_eq!( unregister( &rpc ), 13 );
        assert!( rpc.namespaces().is_empty() );
    }
}
