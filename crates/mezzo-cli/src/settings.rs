//! Application settings management
//!
//! Persistent daemon settings, stored as JSON in the user config directory.

use std::fs;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Display name of the player
    pub player_name: String,

    /// Root directory of the file browser (home directory if unset)
    pub music_dir: Option<PathBuf>,

    /// Default log filter
    pub log_filter: String,

    /// Volume applied at startup (0.0 to 1.0)
    pub volume: f64,

    /// Point playlist items with cover art at the playlist's cover URL
    pub cover_url_override: bool,

    /// Push events on stdout
    pub push_events: bool,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            player_name: "Mezzo".to_string(),
            music_dir: None,
            log_filter: "info".to_string(),
            volume: 1.0,
            cover_url_override: true,
            push_events: true,
        }
    }
}


impl Settings {
    /// Returns the path to the default settings file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "mezzo" ).join( "settings.json" ) )
    }


    /// Loads settings from `path`, or returns defaults if missing or invalid.
    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => serde_json::from_str( &contents ).unwrap_or_else( |e| {
                tracing::warn!( "Invalid settings in {}: {}", path.display(), e );
                Self::default()
            }),
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to `path`, creating its directory if needed.
    pub fn save_to( &self, path: &Path ) {
        // Create parent directory if needed
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn scratch_path( name: &str ) -> PathBuf {
        std::env::temp_dir()
            .join( format!( "mezzo-settings-{}-{}", name, std::process::id() ) )
            .join( "settings.json" )
    }


    #[test]
    fn test_missing_file_gives_defaults() {
        assert_eq!( Settings::load_from( &scratch_path( "missing" ) ), Settings::default() );
    }


    #[test]
    fn test_save_and_reload() {
        let path = scratch_path( "roundtrip" );
        let settings = Settings {
            player_name: "Kitchen".into(),
            volume: 0.4,
            ..Settings::default()
        };

        settings.save_to( &path );
        assert_eq!( Settings::load_from( &path ), settings );

        fs::remove_dir_all( path.parent().unwrap() ).unwrap();
    }


    #[test]
    fn test_partial_file_fills_defaults() {
        let path = scratch_path( "partial" );
        fs::create_dir_all( path.parent().unwrap() ).unwrap();
        fs::write( &path, r#"{ "player_name": "Den" }"# ).unwrap();

        let settings = Settings::load_from( &path );
        assert_eq!( settings.player_name, "Den" );
        assert_eq!( settings.log_filter, "info" );

        fs::remove_dir_all( path.parent().unwrap() ).unwrap();
    }
}
