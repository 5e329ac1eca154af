//! `playlist.*` methods

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{ json, Value };

use super::{ registry_method as method, to_value, Method, ParamSpec, Params, RegisterError, RpcError, RpcRegistry, ValueType };
use crate::playlist::Playlist;
use crate::registry::Registry;


pub const NAMESPACE: &str = "playlist";


/// Registers the `playlist` namespace.
pub fn register( rpc: &RpcRegistry, registry: &Arc<Registry> ) -> Result<(), RegisterError> {
    rpc.register_methods( NAMESPACE, methods( registry ) )
}


/// Builds the `playlist` method table.
pub fn methods( registry: &Arc<Registry> ) -> Vec<Method> {
    let id = ParamSpec::required( "id", ValueType::String );
    let name = ParamSpec::required( "name", ValueType::String );
    let fields = ParamSpec::optional( "fields", ValueType::Array );

    vec![
        method( registry, "get_list", vec![ id, fields ], ValueType::Object, get_list ),
        method( registry, "get_tags", vec![ id, name, fields ], ValueType::Object, get_tags ),
        method( registry, "play", vec![ id, name ], ValueType::Boolean, play ),
        method( registry, "remove", vec![ id, name ], ValueType::Boolean, remove ),
        method( registry, "get_cover", vec![ id, name ], ValueType::Any, get_cover ),
    ]
}


/// Unregisters the `playlist` namespace.
pub fn unregister( rpc: &RpcRegistry ) -> usize {
    rpc.unregister_namespace( NAMESPACE )
}


fn lookup( registry: &Registry, params: &Params ) -> Result<Arc<dyn Playlist>, RpcError> {
    let id = params.str( "id" )?;
    registry.get_playlist( id ).ok_or_else( || RpcError::NoPlaylist( id.to_string() ) )
}


fn get_list( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let playlist = lookup( registry, params )?;
    to_value( &playlist.get_list( params.tag_fields( "fields" )? ) )
}


fn get_tags( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let playlist = lookup( registry, params )?;
    let name = params.str( "name" )?;

    if !playlist.contains( name ) {
        return Err( RpcError::ItemNotFound( name.to_string() ) );
    }
    match playlist.get_tags( name, params.tag_fields( "fields" )? ) {
        Some( tags ) => to_value( &*tags ),
        None => Ok( json!({}) ),
    }
}


fn play( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    lookup( registry, params )?.play( params.str( "name" )? )?;
    Ok( json!( true ) )
}


fn remove( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    lookup( registry, params )?.remove( params.str( "name" )? )?;
    Ok( json!( true ) )
}


/// Returns an item's embedded cover as `{ mime, data }` with base64 data, or
/// `null` when the item has none.
fn get_cover( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let playlist = lookup( registry, params )?;
    let name = params.str( "name" )?;

    if !playlist.contains( name ) {
        return Err( RpcError::ItemNotFound( name.to_string() ) );
    }
    Ok( match playlist.get_cover( name ) {
        Some( cover ) => json!({ "mime": cover.mime, "data": STANDARD.encode( &cover.data ) }),
        None => Value::Null,
    })
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use crate::player::tests::test_player;
    use crate::player::Capabilities;
    use crate::simple_playlist::SimplePlaylist;
    use crate::status::PlayerState;
    use crate::tags::{ Cover, TagFields, Tags };


    fn setup() -> ( RpcRegistry, Arc<SimplePlaylist>, Arc<crate::player::Player> ) {
        let bus = Arc::new( EventBus::new() );
        let registry = Arc::new( Registry::new( Arc::clone( &bus ) ) );
        let ( player, _ ) = test_player( &bus, Capabilities::all() );
        let playlist = Arc::new( SimplePlaylist::new( "pl" ) );
        player.set_playlist( Some( playlist.clone() ) );
        registry.add_player( Arc::clone( &player ) ).unwrap();
        registry.add_playlist( playlist.clone() ).unwrap();

        let rpc = RpcRegistry::new();
        register( &rpc, &registry ).unwrap();
        ( rpc, playlist, player )
    }


    #[test]
    fn test_get_list_shape() {
        let ( rpc, playlist, _ ) = setup();
        let tags = Arc::new( Tags { title: Some( "T".into() ), album: Some( "A".into() ), ..Tags::default() } );
        playlist.add( Some( "a" ), None, "/a", Some( tags ), true ).unwrap();
        playlist.add( Some( "b" ), None, "/b", None, false ).unwrap();

        let list = rpc.call( "playlist.get_list", Some( &json!({ "id": "pl", "fields": [ "title" ] }) ) ).unwrap();
        assert_eq!( list[ "current" ], "a" );
        assert_eq!( list[ "items" ][ 0 ][ "name" ], "b" );
        assert_eq!( list[ "items" ][ 1 ][ "tags" ][ "title" ], "T" );
        assert!( list[ "items" ][ 1 ][ "tags" ].get( "album" ).is_none() );
    }


    #[test]
    fn test_play_missing_keeps_current() {
        let ( rpc, playlist, _ ) = setup();
        playlist.add( Some( "a" ), None, "/a", None, true ).unwrap();

        let err = rpc.call( "playlist.play", Some( &json!({ "id": "pl", "name": "missing" }) ) ).unwrap_err();

        assert_eq!( err.code(), -32003 );
        assert_eq!( playlist.get_list( TagFields::FULL ).current.as_deref(), Some( "a" ) );
    }


    #[test]
    fn test_play_and_remove() {
        let ( rpc, playlist, player ) = setup();
        playlist.add( Some( "a" ), None, "/a", None, false ).unwrap();

        assert_eq!( rpc.call( "playlist.play", Some( &json!({ "id": "pl", "name": "a" }) ) ).unwrap(), true );
        assert_eq!( player.status().state(), PlayerState::Loading );

        assert_eq!( rpc.call( "playlist.remove", Some( &json!([ "pl", "a" ]) ) ).unwrap(), true );
        assert_eq!( player.status().state(), PlayerState::None );
        assert!( playlist.is_empty() );

        let err = rpc.call( "playlist.remove", Some( &json!([ "pl", "a" ]) ) ).unwrap_err();
        assert_eq!( err, RpcError::ItemNotFound( "a".into() ) );
    }


    #[test]
    fn test_get_tags() {
        let ( rpc, playlist, _ ) = setup();
        playlist.add( Some( "bare" ), None, "/bare", None, false ).unwrap();

        assert_eq!( rpc.call( "playlist.get_tags", Some( &json!({ "id": "pl", "name": "bare" }) ) ).unwrap(), json!({}) );
        let err = rpc.call( "playlist.get_tags", Some( &json!({ "id": "pl", "name": "ghost" }) ) ).unwrap_err();
        assert_eq!( err.code(), -32003 );
        let err = rpc.call( "playlist.get_tags", Some( &json!({ "id": "other", "name": "bare" }) ) ).unwrap_err();
        assert_eq!( err.code(), -32001 );
    }


    #[test]
    fn test_get_cover() {
        let ( rpc, playlist, _ ) = setup();
        playlist.set_cover_url_override( true );
        let tags = Arc::new( Tags {
            cover: Some( Cover { data: Arc::from( vec![ 0xffu8, 0xd8, 0xff ] ), mime: "image/jpeg".into() } ),
            ..Tags::default()
        });
        playlist.add( Some( "art" ), None, "/art", Some( tags ), false ).unwrap();
        playlist.add( Some( "bare" ), None, "/bare", None, false ).unwrap();

        let list = rpc.call( "playlist.get_list", Some( &json!({ "id": "pl" }) ) ).unwrap();
        assert_eq!( list[ "items" ][ 1 ][ "tags" ][ "cover_url" ], "/cover/playlist/pl/art" );

        let cover = rpc.call( "playlist.get_cover", Some( &json!({ "id": "pl", "name": "art" }) ) ).unwrap();
        assert_eq!( cover[ "mime" ], "image/jpeg" );
        assert_eq!( cover[ "data" ], "/9j/" );

        assert_eq!( rpc.call( "playlist.get_cover", Some( &json!([ "pl", "bare" ]) ) ).unwrap(), Value::Null );
        let err = rpc.call( "playlist.get_cover", Some( &json!([ "pl", "ghost" ]) ) ).unwrap_err();
        assert_eq!( err.code(), -32003 );
    }
}
