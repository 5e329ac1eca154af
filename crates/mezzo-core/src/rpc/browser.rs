//! `browser.*` methods

use std::sync::Arc;

use serde_json::{ json, Value };

use super::{ registry_method as method, to_value, Method, ParamSpec, Params, RegisterError, RpcError, RpcRegistry, ValueType };
use crate::browser::Browser;
use crate::registry::Registry;


pub const NAMESPACE: &str = "browser";


/// Registers the `browser` namespace.
pub fn register( rpc: &RpcRegistry, registry: &Arc<Registry> ) -> Result<(), RegisterError> {
    rpc.register_methods( NAMESPACE, methods( registry ) )
}


/// Builds the `browser` method table.
pub fn methods( registry: &Arc<Registry> ) -> Vec<Method> {
    let id = ParamSpec::required( "id", ValueType::String );

    vec![
        method( registry, "get_browsers", vec![], ValueType::Array, get_browsers ),
        method( registry, "get_info", vec![ id ], ValueType::Object, get_info ),
        method(
            registry,
            "get_list",
            vec![ id, ParamSpec::optional( "path", ValueType::String ) ],
            ValueType::Array,
            get_list,
        ),
    ]
}


/// Unregisters the `browser` namespace.
pub fn unregister( rpc: &RpcRegistry ) -> usize {
    rpc.unregister_namespace( NAMESPACE )
}


fn lookup( registry: &Registry, params: &Params ) -> Result<Arc<dyn Browser>, RpcError> {
    let id = params.str( "id" )?;
    registry.get_browser( id ).ok_or_else( || RpcError::NoBrowser( id.to_string() ) )
}


fn get_browsers( registry: &Registry, _params: &Params ) -> Result<Value, RpcError> {
    let browsers: Vec<Value> = registry.browsers().into_iter()
        .map( |( id, browser )| {
            let info = browser.info();
            json!({ "id": id, "name": info.name, "description": info.description })
        })
        .collect();
    Ok( Value::Array( browsers ) )
}


fn get_info( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    to_value( &lookup( registry, params )?.info() )
}


fn get_list( registry: &Registry, params: &Params ) -> Result<Value, RpcError> {
    let browser = lookup( registry, params )?;
    let path = params.opt_str( "path" )?.unwrap_or( "/" );
    to_value( &browser.get_list( path )? )
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::browser::{ BrowserError, BrowserInfo, BrowserItem, ItemType };
    use crate::event::EventBus;


    struct StaticBrowser;


    impl Browser for StaticBrowser {
        fn info( &self ) -> BrowserInfo {
            BrowserInfo { name: "Radio".into(), description: "Web radios".into() }
        }

        fn get_list( &self, path: &str ) -> Result<Vec<BrowserItem>, BrowserError> {
            match path {
                "/" => Ok( vec![ BrowserItem {
                    name: "Jazz FM".into(),
                    path: "jazz".into(),
                    item_type: ItemType::Media,
                }]),
                other => Err( BrowserError::NotFound( other.to_string() ) ),
            }
        }
    }


    fn setup() -> RpcRegistry {
        let registry = Arc::new( Registry::new( Arc::new( EventBus::new() ) ) );
        registry.add_browser( "radio", Arc::new( StaticBrowser ) ).unwrap();
        let rpc = RpcRegistry::new();
        register( &rpc, &registry ).unwrap();
        rpc
    }


    #[test]
    fn test_get_browsers_and_info() {
        let rpc = setup();
        let browsers = rpc.call( "browser.get_browsers", None ).unwrap();
        assert_eq!( browsers, json!([ { "id": "radio", "name": "Radio", "description": "Web radios" } ]) );

        let info = rpc.call( "browser.get_info", Some( &json!({ "id": "radio" }) ) ).unwrap();
        assert_eq!( info[ "name" ], "Radio" );
    }


    #[test]
    fn test_get_list() {
        let rpc = setup();
        let items = rpc.call( "browser.get_list", Some( &json!({ "id": "radio" }) ) ).unwrap();
        assert_eq!( items[ 0 ][ "type" ], "media" );

        let err = rpc.call( "browser.get_list", Some( &json!({ "id": "radio", "path": "rock" }) ) ).unwrap_err();
        assert_eq!( err.code(), -32003 );

        let err = rpc.call( "browser.get_list", Some( &json!({ "id": "tv" }) ) ).unwrap_err();
        assert_eq!( err, RpcError::NoBrowser( "tv".into() ) );
    }
}
