//! RPC method registry and dispatch
//!
//! Methods are grouped by namespace (`player`, `playlist`, `browser`) and
//! called as `"<namespace>.<name>"`. Every method declares a parameter
//! schema; parameters are checked against it before the handler runs, so
//! handlers only ever see well-formed input.
//!
//! `RpcRegistry::handle_str` wraps dispatch in the JSON-RPC 2.0 envelope.

pub mod browser;
pub mod player;
pub mod playlist;

use std::collections::HashMap;
use std::fmt;
use std::sync::{ Arc, RwLock };

use serde_json::{ json, Map, Value };
use thiserror::Error;

use crate::browser::BrowserError;
use crate::player::PlayerError;
use crate::playlist::PlaylistError;
use crate::registry::{ Registry, RegistryError };
use crate::sync::{ read, write };
use crate::tags::TagFields;


/// Errors returned to RPC callers.
#[derive( Debug, Clone, PartialEq, Error )]
pub enum RpcError {
    #[error( "Parse error: {0}" )]
    Parse( String ),

    #[error( "Invalid request: {0}" )]
    InvalidRequest( String ),

    #[error( "Method not found: {0}" )]
    MethodNotFound( String ),

    #[error( "Invalid params: {0}" )]
    InvalidParams( String ),

    #[error( "Internal error: {0}" )]
    Internal( String ),

    #[error( "No player found: {0}" )]
    NoPlayer( String ),

    #[error( "No playlist found: {0}" )]
    NoPlaylist( String ),

    #[error( "No browser found: {0}" )]
    NoBrowser( String ),

    #[error( "Item not found: {0}" )]
    ItemNotFound( String ),

    #[error( "Not supported: {0}" )]
    Unsupported( String ),

    #[error( "Operation failed: {0}" )]
    Failed( String ),
}


impl RpcError {
    /// Returns the JSON-RPC error code.
    pub fn code( &self ) -> i64 {
        match self {
            RpcError::Parse( _ ) => -32700,
            RpcError::InvalidRequest( _ ) => -32600,
            RpcError::MethodNotFound( _ ) => -32601,
            RpcError::InvalidParams( _ ) => -32602,
            RpcError::Internal( _ ) => -32603,
            RpcError::NoPlayer( _ ) => -32000,
            RpcError::NoPlaylist( _ ) => -32001,
            RpcError::NoBrowser( _ ) => -32002,
            RpcError::ItemNotFound( _ ) => -32003,
            RpcError::Unsupported( _ ) => -32004,
            RpcError::Failed( _ ) => -32005,
        }
    }


    /// Returns true for errors raised before any handler ran.
    pub fn is_protocol_error( &self ) -> bool {
        matches!(
            self,
            RpcError::Parse( _ ) | RpcError::InvalidRequest( _ )
                | RpcError::MethodNotFound( _ ) | RpcError::InvalidParams( _ )
        )
    }


    pub fn to_json( &self ) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}


impl From<PlayerError> for RpcError {
    fn from( e: PlayerError ) -> Self {
        match e {
            PlayerError::Unsupported( op ) => RpcError::Unsupported( op.to_string() ),
            PlayerError::Playlist( e ) => e.into(),
            PlayerError::NoPlaylist | PlayerError::Errored | PlayerError::Backend( _ ) => {
                RpcError::Failed( e.to_string() )
            }
        }
    }
}


impl From<PlaylistError> for RpcError {
    fn from( e: PlaylistError ) -> Self {
        match e {
            PlaylistError::NotFound( name ) => RpcError::ItemNotFound( name ),
            PlaylistError::NotPlayable( _ ) | PlaylistError::NotRemovable( _ ) => {
                RpcError::Unsupported( e.to_string() )
            }
            PlaylistError::NamesExhausted( _ ) | PlaylistError::Playback( _ ) => {
                RpcError::Failed( e.to_string() )
            }
        }
    }
}


impl From<BrowserError> for RpcError {
    fn from( e: BrowserError ) -> Self {
        match e {
            BrowserError::NotFound( path ) => RpcError::ItemNotFound( path ),
            BrowserError::InvalidPath( _ ) => RpcError::InvalidParams( e.to_string() ),
            BrowserError::Io( _ ) => RpcError::Failed( e.to_string() ),
        }
    }
}


impl From<RegistryError> for RpcError {
    fn from( e: RegistryError ) -> Self {
        RpcError::Failed( e.to_string() )
    }
}


/// JSON type of a parameter or result.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum ValueType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
    Any,
}


impl ValueType {
    /// Returns true if `value` has this type.
    pub fn matches( &self, value: &Value ) -> bool {
        match self {
            ValueType::Null => value.is_null(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Number => value.is_number(),
            ValueType::String => value.is_string(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
            ValueType::Any => true,
        }
    }
}


impl fmt::Display for ValueType {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        let name = match self {
            ValueType::Null => "null",
            ValueType::Boolean => "a boolean",
            ValueType::Integer => "an integer",
            ValueType::Number => "a number",
            ValueType::String => "a string",
            ValueType::Array => "an array",
            ValueType::Object => "an object",
            ValueType::Any => "any value",
        };
        write!( f, "{}", name )
    }
}


/// One entry of a method's parameter schema.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ValueType,
    pub required: bool,
}


impl ParamSpec {
    pub const fn required( name: &'static str, kind: ValueType ) -> Self {
        Self { name, kind, required: true }
    }


    pub const fn optional( name: &'static str, kind: ValueType ) -> Self {
        Self { name, kind, required: false }
    }
}


/// Validated parameters handed to a handler.
///
/// Only parameters declared in the schema are kept; `null` counts as absent.
#[derive( Debug, Clone, Default, PartialEq )]
pub struct Params {
    values: Map<String, Value>,
}


impl Params {
    pub fn get( &self, name: &str ) -> Option<&Value> {
        self.values.get( name )
    }


    pub fn str( &self, name: &str ) -> Result<&str, RpcError> {
        self.opt_str( name )?.ok_or_else( || missing( name ) )
    }


    pub fn opt_str( &self, name: &str ) -> Result<Option<&str>, RpcError> {
        self.typed( name, Value::as_str, ValueType::String )
    }


    pub fn bool( &self, name: &str ) -> Result<bool, RpcError> {
        self.opt_bool( name )?.ok_or_else( || missing( name ) )
    }


    pub fn opt_bool( &self, name: &str ) -> Result<Option<bool>, RpcError> {
        self.typed( name, Value::as_bool, ValueType::Boolean )
    }


    pub fn u64( &self, name: &str ) -> Result<u64, RpcError> {
        self.typed( name, Value::as_u64, ValueType::Integer )?.ok_or_else( || missing( name ) )
    }


    pub fn f64( &self, name: &str ) -> Result<f64, RpcError> {
        self.typed( name, Value::as_f64, ValueType::Number )?.ok_or_else( || missing( name ) )
    }


    /// Reads a tag field selection; a missing list selects everything.
    pub fn tag_fields( &self, name: &str ) -> Result<TagFields, RpcError> {
        match self.string_list( name )? {
            Some( names ) => Ok( TagFields::from_names( names ) ),
            None => Ok( TagFields::FULL ),
        }
    }


    /// Reads an array of strings.
    pub fn string_list( &self, name: &str ) -> Result<Option<Vec<&str>>, RpcError> {
        let Some( value ) = self.values.get( name ) else {
            return Ok( None );
        };
        value.as_array()
            .and_then( |items| items.iter().map( Value::as_str ).collect::<Option<Vec<_>>>() )
            .map( Some )
            .ok_or_else( || RpcError::InvalidParams( format!( "'{}' must be an array of strings", name ) ) )
    }


    fn typed<'a, T>(
        &'a self,
        name: &str,
        convert: impl Fn( &'a Value ) -> Option<T>,
        kind: ValueType,
    ) -> Result<Option<T>, RpcError> {
        match self.values.get( name ) {
            None => Ok( None ),
            Some( value ) => convert( value )
                .map( Some )
                .ok_or_else( || RpcError::InvalidParams( format!( "'{}' must be {}", name, kind ) ) ),
        }
    }
}


fn missing( name: &str ) -> RpcError {
    RpcError::InvalidParams( format!( "missing parameter '{}'", name ) )
}


pub type Handler = Box<dyn Fn( &Params ) -> Result<Value, RpcError> + Send + Sync>;


/// A callable RPC method.
pub struct Method {
    name: String,
    params: Vec<ParamSpec>,
    result: ValueType,
    handler: Handler,
}


impl Method {
    /// @param name - Name within its namespace
    /// @param params - Parameter schema, in positional order
    /// @param result - Expected result type
    /// @param handler - Called with the validated parameters
    pub fn new<F>( name: &str, params: Vec<ParamSpec>, result: ValueType, handler: F ) -> Self
    where
        F: Fn( &Params ) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            params,
            result,
            handler: Box::new( handler ),
        }
    }


    pub fn name( &self ) -> &str {
        &self.name
    }


    pub fn params( &self ) -> &[ParamSpec] {
        &self.params
    }


    pub fn result( &self ) -> ValueType {
        self.result
    }


    /// Checks a raw parameter payload against the schema.
    ///
    /// Accepts an object keyed by name or an array in schema order.
    pub fn validate( &self, raw: Option<&Value> ) -> Result<Params, RpcError> {
        let provided: Vec<Option<&Value>> = match raw {
            None | Some( Value::Null ) => vec![ None; self.params.len() ],
            Some( Value::Object( map ) ) => {
                self.params.iter().map( |spec| map.get( spec.name ) ).collect()
            }
            Some( Value::Array( items ) ) => {
                if items.len() > self.params.len() {
                    return Err( RpcError::InvalidParams( format!(
                        "expected at most {} parameters, got {}", self.params.len(), items.len()
                    )));
                }
                ( 0..self.params.len() ).map( |i| items.get( i ) ).collect()
            }
            Some( _ ) => {
                return Err( RpcError::InvalidParams( "params must be an object or an array".into() ) );
            }
        };

        let mut values = Map::new();
        for ( spec, value ) in self.params.iter().zip( provided ) {
            match value.filter( |v| !v.is_null() ) {
                None if spec.required => return Err( missing( spec.name ) ),
                None => {}
                Some( v ) if !spec.kind.matches( v ) => {
                    return Err( RpcError::InvalidParams( format!( "'{}' must be {}", spec.name, spec.kind ) ) );
                }
                Some( v ) => {
                    values.insert( spec.name.to_string(), v.clone() );
                }
            }
        }
        Ok( Params { values } )
    }
}


/// Errors that can occur when registering methods.
#[derive( Debug, Error )]
pub enum RegisterError {
    #[error( "Method {namespace}.{method} is already registered" )]
    Duplicate { namespace: String, method: String },
}


/// Namespace-scoped method table.
#[derive( Default )]
pub struct RpcRegistry {
    namespaces: RwLock<HashMap<String, HashMap<String, Arc<Method>>>>,
}


impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }


    /// Adds a batch of methods to a namespace.
    ///
    /// Either every method is added or, if any name is already taken, none.
    pub fn register_methods( &self, namespace: &str, methods: Vec<Method> ) -> Result<(), RegisterError> {
        let mut namespaces = write( &self.namespaces );
        let existing = namespaces.get( namespace );

        let mut seen = std::collections::HashSet::new();
        for method in &methods {
            let taken = existing.is_some_and( |table| table.contains_key( &method.name ) );
            if taken || !seen.insert( method.name.as_str() ) {
                return Err( RegisterError::Duplicate {
                    namespace: namespace.to_string(),
                    method: method.name.clone(),
                });
            }
        }

        let count = methods.len();
        let table = namespaces.entry( namespace.to_string() ).or_default();
        for method in methods {
            table.insert( method.name.clone(), Arc::new( method ) );
        }

        tracing::debug!( "Registered {} methods in '{}'", count, namespace );
        Ok(())
    }


    /// Removes a batch of methods from a namespace.
    ///
    /// @returns The number of methods removed
    pub fn unregister_methods( &self, namespace: &str, names: &[&str] ) -> usize {
        let mut namespaces = write( &self.namespaces );
        let Some( table ) = namespaces.get_mut( namespace ) else {
            return 0;
        };

        let removed = names.iter().filter( |name| table.remove( **name ).is_some() ).count();
        if table.is_empty() {
            namespaces.remove( namespace );
        }

        tracing::debug!( "Unregistered {} methods from '{}'", removed, namespace );
        removed
    }


    /// Removes a whole namespace.
    ///
    /// @returns The number of methods removed
    pub fn unregister_namespace( &self, namespace: &str ) -> usize {
        let removed = write( &self.namespaces ).remove( namespace ).map_or( 0, |table| table.len() );
        tracing::debug!( "Unregistered {} methods from '{}'", removed, namespace );
        removed
    }


    /// Returns the sorted method names of a namespace.
    pub fn methods( &self, namespace: &str ) -> Vec<String> {
        let mut names: Vec<String> = read( &self.namespaces )
            .get( namespace )
            .map( |table| table.keys().cloned().collect() )
            .unwrap_or_default();
        names.sort();
        names
    }


    /// Returns the sorted namespace names.
    pub fn namespaces( &self ) -> Vec<String> {
        let mut names: Vec<String> = read( &self.namespaces ).keys().cloned().collect();
        names.sort();
        names
    }


    /// Looks up, validates and invokes `"<namespace>.<name>"`.
    ///
    /// The table lock is released before the handler runs.
    pub fn call( &self, method: &str, params: Option<&Value> ) -> Result<Value, RpcError> {
        let target = {
            let ( namespace, name ) = method.split_once( '.' )
                .ok_or_else( || RpcError::MethodNotFound( method.to_string() ) )?;
            read( &self.namespaces )
                .get( namespace )
                .and_then( |table| table.get( name ) )
                .cloned()
                .ok_or_else( || RpcError::MethodNotFound( method.to_string() ) )?
        };

        let params = target.validate( params )?;
        let result = ( target.handler )( &params )?;

        if !target.result.matches( &result ) {
            tracing::warn!( "Method {} returned {}, expected {}", method, result, target.result );
        }
        Ok( result )
    }


    /// Handles one decoded JSON-RPC 2.0 request.
    ///
    /// @returns The response, or `None` for notifications
    pub fn handle( &self, request: &Value ) -> Option<Value> {
        let Some( object ) = request.as_object() else {
            return Some( error_response( Value::Null, &RpcError::InvalidRequest( "not an object".into() ) ) );
        };

        let id = object.get( "id" ).cloned();
        let reply_id = id.clone().unwrap_or( Value::Null );

        if let Some( ref id ) = id {
            if !( id.is_null() || id.is_string() || id.is_number() ) {
                return Some( error_response( Value::Null, &RpcError::InvalidRequest( "invalid id".into() ) ) );
            }
        }
        if object.get( "jsonrpc" ).is_some_and( |v| v != "2.0" ) {
            return Some( error_response( reply_id, &RpcError::InvalidRequest( "unsupported version".into() ) ) );
        }
        let Some( method ) = object.get( "method" ).and_then( Value::as_str ) else {
            return Some( error_response( reply_id, &RpcError::InvalidRequest( "missing method".into() ) ) );
        };

        let outcome = self.call( method, object.get( "params" ) );
        if let Err( ref e ) = outcome {
            tracing::debug!( "Call {} failed: {}", method, e );
        }

        // Notifications get no response
        if id.is_none() {
            return None;
        }

        Some( match outcome {
            Ok( result ) => json!({ "jsonrpc": "2.0", "id": reply_id, "result": result }),
            Err( e ) => error_response( reply_id, &e ),
        })
    }


    /// Handles a raw JSON-RPC request or batch.
    ///
    /// @returns The serialized response, or `None` if nothing needs sending
    pub fn handle_str( &self, text: &str ) -> Option<String> {
        let response = match serde_json::from_str::<Value>( text ) {
            Err( e ) => Some( error_response( Value::Null, &RpcError::Parse( e.to_string() ) ) ),
            Ok( Value::Array( batch ) ) if batch.is_empty() => {
                Some( error_response( Value::Null, &RpcError::InvalidRequest( "empty batch".into() ) ) )
            }
            Ok( Value::Array( batch ) ) => {
                let responses: Vec<Value> = batch.iter().filter_map( |r| self.handle( r ) ).collect();
                ( !responses.is_empty() ).then_some( Value::Array( responses ) )
            }
            Ok( request ) => self.handle( &request ),
        };
        response.map( |r| r.to_string() )
    }
}


/// Builds a method whose handler looks entities up in `registry`.
pub( crate ) fn registry_method(
    registry: &Arc<Registry>,
    name: &str,
    params: Vec<ParamSpec>,
    result: ValueType,
    handler: fn( &Registry, &Params ) -> Result<Value, RpcError>,
) -> Method {
    let registry = Arc::clone( registry );
    Method::new( name, params, result, move |params| handler( &registry, params ) )
}


/// Serializes a handler result.
pub( crate ) fn to_value<T: serde::Serialize + ?Sized>( value: &T ) -> Result<Value, RpcError> {
    serde_json::to_value( value ).map_err( |e| RpcError::Internal( e.to_string() ) )
}


fn error_response( id: Value, error: &RpcError ) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": error.to_json() })
}


/// Registers the player, playlist and browser namespaces.
pub fn register_all( rpc: &RpcRegistry, registry: &Arc<Registry> ) -> Result<(), RegisterError> {
    player::register( rpc, registry )?;
    playlist::register( rpc, registry )?;
    browser::register( rpc, registry )?;
    Ok(())
}


#[cfg( test )]
mod tests {
    use super::*;


    fn echo_registry() -> RpcRegistry {
        let rpc = RpcRegistry::new();
        rpc.register_methods( "test", vec![
            Method::new(
                "echo",
                vec![
                    ParamSpec::required( "text", ValueType::String ),
                    ParamSpec::optional( "times", ValueType::Integer ),
                ],
                ValueType::String,
                |params| {
                    let times = params.get( "times" ).and_then( Value::as_u64 ).unwrap_or( 1 ) as usize;
                    Ok( json!( params.str( "text" )?.repeat( times ) ) )
                },
            ),
        ]).unwrap();
        rpc
    }


    #[test]
    fn test_call_with_object_and_positional_params() {
        let rpc = echo_registry();
        assert_eq!( rpc.call( "test.echo", Some( &json!({ "text": "ab", "times": 2 }) ) ).unwrap(), "abab" );
        assert_eq!( rpc.call( "test.echo", Some( &json!([ "ab" ]) ) ).unwrap(), "ab" );
        assert_eq!( rpc.call( "test.echo", Some( &json!({ "text": "x", "times": null }) ) ).unwrap(), "x" );
    }


    #[test]
    fn test_invalid_params_rejected_before_handler() {
        let called = Arc::new( std::sync::atomic::AtomicBool::new( false ) );
        let called_clone = Arc::clone( &called );
        let rpc = RpcRegistry::new();
        rpc.register_methods( "test", vec![
            Method::new( "f", vec![ ParamSpec::required( "n", ValueType::Integer ) ], ValueType::Null, move |_| {
                called_clone.store( true, std::sync::atomic::Ordering::SeqCst );
                Ok( Value::Null )
            }),
        ]).unwrap();

        for params in [ json!({}), json!({ "n": "1" }), json!({ "n": 1.5 }), json!([ 1, 2 ]), json!( "n" ) ] {
            let err = rpc.call( "test.f", Some( &params ) ).unwrap_err();
            assert_eq!( err.code(), -32602, "params {}", params );
        }
        assert!( !called.load( std::sync::atomic::Ordering::SeqCst ) );
    }


    #[test]
    fn test_unknown_method() {
        let rpc = echo_registry();
        assert!( matches!( rpc.call( "test.nope", None ), Err( RpcError::MethodNotFound( _ ) ) ) );
        assert!( matches!( rpc.call( "nope.echo", None ), Err( RpcError::MethodNotFound( _ ) ) ) );
        assert!( matches!( rpc.call( "echo", None ), Err( RpcError::MethodNotFound( _ ) ) ) );
    }


    #[test]
    fn test_register_batch_is_atomic() {
        let rpc = echo_registry();
        let result = rpc.register_methods( "test", vec![
            Method::new( "fresh", vec![], ValueType::Null, |_| Ok( Value::Null ) ),
            Method::new( "echo", vec![], ValueType::Null, |_| Ok( Value::Null ) ),
        ]);
        assert!( matches!( result, Err( RegisterError::Duplicate { .. } ) ) );
        assert_eq!( rpc.methods( "test" ), vec![ "echo" ] );

        assert_eq!( rpc.unregister_methods( "test", &[ "echo", "missing" ] ), 1 );
        assert!( rpc.namespaces().is_empty() );
    }


    #[test]
    fn test_handle_envelope() {
        let rpc = echo_registry();

        let response = rpc.handle( &json!({
            "jsonrpc": "2.0", "id": 7, "method": "test.echo", "params": { "text": "hi" }
        })).unwrap();
        assert_eq!( response, json!({ "jsonrpc": "2.0", "id": 7, "result": "hi" }) );

        let response = rpc.handle( &json!({ "jsonrpc": "2.0", "id": "a", "method": "test.missing" }) ).unwrap();
        assert_eq!( response[ "error" ][ "code" ], -32601 );
        assert_eq!( response[ "id" ], "a" );

        let notification = json!({ "jsonrpc": "2.0", "method": "test.echo", "params": { "text": "hi" } });
        assert!( rpc.handle( &notification ).is_none() );
    }


    #[test]
    fn test_handle_str_parse_error_and_batch() {
        let rpc = echo_registry();

        let response: Value = serde_json::from_str( &rpc.handle_str( "{not json" ).unwrap() ).unwrap();
        assert_eq!( response[ "error" ][ "code" ], -32700 );
        assert_eq!( response[ "id" ], Value::Null );

        let batch = r#"[
            { "jsonrpc": "2.0", "id": 1, "method": "test.echo", "params": [ "a" ] },
            { "jsonrpc": "2.0", "method": "test.echo", "params": [ "b" ] },
            { "jsonrpc": "2.0", "id": 2, "method": "test.echo" }
        ]"#;
        let response: Value = serde_json::from_str( &rpc.handle_str( batch ).unwrap() ).unwrap();
        let responses = response.as_array().unwrap();
        assert_eq!( responses.len(), 2 );
        assert_eq!( responses[ 0 ][ "result" ], "a" );
        assert_eq!( responses[ 1 ][ "error" ][ "code" ], -32602 );

        let empty: Value = serde_json::from_str( &rpc.handle_str( "[]" ).unwrap() ).unwrap();
        assert_eq!( empty[ "error" ][ "code" ], -32600 );
    }


    #[test]
    fn test_error_mapping() {
        let e: RpcError = PlaylistError::NotFound( "x".into() ).into();
        assert_eq!( e.code(), -32003 );
        let e: RpcError = PlayerError::Unsupported( "volume" ).into();
        assert_eq!( e.code(), -32004 );
        assert!( RpcError::InvalidParams( String::new() ).is_protocol_error() );
        assert!( !RpcError::NoPlayer( String::new() ).is_protocol_error() );
    }
}
