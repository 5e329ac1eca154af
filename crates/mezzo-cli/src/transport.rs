//! Line-delimited JSON-RPC transport
//!
//! One request (or batch) per input line, one response per output line.
//! Events are pushed on the same output as `{"event": {...}}` lines.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::io::{ AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt };
use tokio::sync::mpsc;

use mezzo_core::{ EventBus, RpcRegistry };


/// Serves requests from `reader` until it reaches end of input.
///
/// Requests are dispatched one at a time on the blocking pool, so responses
/// keep request order. Event callbacks only enqueue a line and never block.
///
/// @returns The writer, once everything queued has been written
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    rpc: Arc<RpcRegistry>,
    bus: Arc<EventBus>,
    push_events: bool,
) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let ( sender, receiver ) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn( write_lines( writer, receiver ) );

    let client = push_events.then( || {
        let sender = sender.clone();
        bus.register( move |_, id, event| {
            let line = json!({ "event": event.to_json( id ) }).to_string();
            let _ = sender.send( line );
        })
    });

    let mut lines = reader.lines();
    while let Some( line ) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let rpc = Arc::clone( &rpc );
        let response = tokio::task::spawn_blocking( move || rpc.handle_str( &line ) ).await?;
        if let Some( response ) = response {
            sender.send( response )?;
        }
    }

    tracing::info!( "End of input" );
    if let Some( client ) = client {
        bus.unregister( &client );
    }
    drop( sender );

    Ok( writer_task.await?? )
}


async fn write_lines<W>( mut writer: W, mut receiver: mpsc::UnboundedReceiver<String> ) -> std::io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some( line ) = receiver.recv().await {
        writer.write_all( line.as_bytes() ).await?;
        writer.write_all( b"\n" ).await?;
        writer.flush().await?;
    }
    Ok( writer )
}


#[cfg( test )]
mod tests {
    use super::*;
    use mezzo_core::rpc::register_all;
    use mezzo_core::{ Capabilities, Player, Registry, SimplePlaylist };
    use serde_json::Value;

    use crate::backend::LoopbackBackend;


    fn setup() -> ( Arc<RpcRegistry>, Arc<EventBus>, Arc<Registry> ) {
        let bus = Arc::new( EventBus::new() );
        let registry = Arc::new( Registry::new( Arc::clone( &bus ) ) );
        let player = Player::new( "p", "P", Capabilities::all(), Box::new( LoopbackBackend::new() ), Arc::clone( &bus ) );
        player.set_playlist( Some( Arc::new( SimplePlaylist::new( "pl" ) ) ) );
        registry.add_player( player ).unwrap();

        let rpc = Arc::new( RpcRegistry::new() );
        register_all( &rpc, &registry ).unwrap();
        ( rpc, bus, registry )
    }


    fn output_lines( output: Vec<u8> ) -> Vec<Value> {
        String::from_utf8( output ).unwrap()
            .lines()
            .map( |l| serde_json::from_str( l ).unwrap() )
            .collect()
    }


    #[tokio::test]
    async fn test_responses_in_request_order() {
        let ( rpc, bus, registry ) = setup();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"player.get_info","params":{"id":"p"}}"#, "\n",
            "\n",
            r#"{"jsonrpc":"2.0","method":"player.get_pos","params":["p"]}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"player.get_volume"}"#, "\n",
        );

        let output = serve( input.as_bytes(), Vec::new(), rpc, bus, false ).await.unwrap();
        let lines = output_lines( output );

        assert_eq!( lines.len(), 2 );
        assert_eq!( lines[ 0 ][ "result" ][ "playlist_id" ], "pl" );
        assert_eq!( lines[ 1 ][ "error" ][ "code" ], -32601 );
        registry.clear();
    }


    #[tokio::test]
    async fn test_events_are_pushed() {
        let ( rpc, bus, registry ) = setup();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"player.set_mute","params":{"id":"p","mute":true}}"#, "\n",
        );

        let output = serve( input.as_bytes(), Vec::new(), rpc, Arc::clone( &bus ), true ).await.unwrap();
        let lines = output_lines( output );

        let event = &lines[ 0 ][ "event" ];
        assert_eq!( event[ "type" ], "player" );
        assert_eq!( event[ "subtype" ], "mute" );
        assert_eq!( event[ "data" ], true );
        assert_eq!( lines[ 1 ][ "result" ], true );
        assert_eq!( bus.client_count(), 0 );
        registry.clear();
    }
}
