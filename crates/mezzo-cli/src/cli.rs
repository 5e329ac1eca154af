//! Command-line argument parsing for Mezzo.

use std::path::PathBuf;

use clap::Parser;


/// Mezzo - JSON-RPC control daemon for a networked media appliance.
///
/// Reads one JSON-RPC request per line on stdin and writes responses (and,
/// unless disabled, event notifications) as lines on stdout.
#[derive( Parser, Debug )]
#[command( name = "mezzo" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Settings file to use instead of the default location.
    #[arg( short, long )]
    pub settings: Option<PathBuf>,

    /// Root directory exposed by the file browser.
    #[arg( short, long )]
    pub music_dir: Option<PathBuf>,

    /// Display name of the player.
    #[arg( short, long )]
    pub name: Option<String>,

    /// Log filter (e.g. "info" or "mezzo_core=debug"); RUST_LOG takes precedence.
    #[arg( short, long )]
    pub log: Option<String>,

    /// Do not push events on stdout.
    #[arg( long )]
    pub no_events: bool,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from( [ "mezzo", "--music-dir", "/srv/music", "--name", "Kitchen", "--no-events" ] );
        assert_eq!( args.music_dir, Some( PathBuf::from( "/srv/music" ) ) );
        assert_eq!( args.name.as_deref(), Some( "Kitchen" ) );
        assert!( args.no_events );
        assert!( args.settings.is_none() );
    }
}
