//! Media browsers
//!
//! A browser exposes a tree of media sources that clients can navigate and
//! hand to a player. `FileBrowser` serves a local directory.

use std::fs;
use std::path::{ Component, Path, PathBuf };

use serde::Serialize;
use thiserror::Error;


/// Supported audio extensions.
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "wav", "m4a", "aac", "opus", "wma", "aiff", "alac",
];


/// Errors that can occur while browsing.
#[derive( Debug, Error )]
pub enum BrowserError {
    #[error( "Path not found: {0}" )]
    NotFound( String ),

    #[error( "Invalid path: {0}" )]
    InvalidPath( String ),

    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),
}


/// Description of a browser as exposed to clients.
#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct BrowserInfo {
    pub name: String,
    pub description: String,
}


/// Kind of a browser entry.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize )]
#[serde( rename_all = "snake_case" )]
pub enum ItemType {
    Directory,
    Media,
    File,
}


/// One entry of a browser listing.
#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct BrowserItem {
    pub name: String,

    /// Path to hand back to the browser (directories) or to a player (media)
    pub path: String,

    #[serde( rename = "type" )]
    pub item_type: ItemType,
}


/// Capability interface of every browser kind.
pub trait Browser: Send + Sync {
    fn info( &self ) -> BrowserInfo;

    /// Lists the entries under `path`, directories first.
    fn get_list( &self, path: &str ) -> Result<Vec<BrowserItem>, BrowserError>;
}


/// Browser over a local directory tree.
#[derive( Debug )]
pub struct FileBrowser {
    root: PathBuf,
}


impl FileBrowser {
    /// Creates a browser rooted at `root`.
    pub fn new( root: impl Into<PathBuf> ) -> Self {
        Self { root: root.into() }
    }


    pub fn root( &self ) -> &Path {
        &self.root
    }


    /// Returns true if the file has a known audio extension.
    pub fn is_audio_file( path: &Path ) -> bool {
        path.extension()
            .and_then( |e| e.to_str() )
            .map( |e| AUDIO_EXTENSIONS.contains( &e.to_lowercase().as_str() ) )
            .unwrap_or( false )
    }


    /// Maps a client path onto the filesystem, refusing to leave the root.
    fn resolve( &self, path: &str ) -> Result<PathBuf, BrowserError> {
        let relative = Path::new( path.trim_start_matches( '/' ) );
        let mut resolved = self.root.clone();

        for component in relative.components() {
            match component {
                Component::Normal( part ) => resolved.push( part ),
                Component::CurDir => {}
                _ => return Err( BrowserError::InvalidPath( path.to_string() ) ),
            }
        }
        Ok( resolved )
    }
}


impl Browser for FileBrowser {
    fn info( &self ) -> BrowserInfo {
        BrowserInfo {
            name: "Files".to_string(),
            description: format!( "Local files under {}", self.root.display() ),
        }
    }


    fn get_list( &self, path: &str ) -> Result<Vec<BrowserItem>, BrowserError> {
        let dir = self.resolve( path )?;
        if !dir.is_dir() {
            return Err( BrowserError::NotFound( path.to_string() ) );
        }

        let base = path.trim_matches( '/' );
        let mut dirs = Vec::new();
        let mut files = Vec::new();

        for entry in fs::read_dir( &dir )?.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();

            // Skip hidden files (starting with .)
            if name.starts_with( '.' ) {
                continue;
            }

            let entry_path = entry.path();
            let client_path = if base.is_empty() {
                name.clone()
            } else {
                format!( "{}/{}", base, name )
            };

            if entry_path.is_dir() {
                dirs.push( BrowserItem { name, path: client_path, item_type: ItemType::Directory } );
            } else {
                let item_type = if Self::is_audio_file( &entry_path ) { ItemType::Media } else { ItemType::File };
                files.push( BrowserItem { name, path: client_path, item_type } );
            }
        }

        // Sort directories and files separately (case-insensitive)
        dirs.sort_by( |a, b| a.name.to_lowercase().cmp( &b.name.to_lowercase() ) );
        files.sort_by( |a, b| a.name.to_lowercase().cmp( &b.name.to_lowercase() ) );

        dirs.extend( files );
        Ok( dirs )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn scratch_dir( name: &str ) -> PathBuf {
        let dir = std::env::temp_dir().join( format!( "mezzo-browser-{}-{}", name, std::process::id() ) );
        let _ = fs::remove_dir_all( &dir );
        fs::create_dir_all( dir.join( "Jazz" ) ).unwrap();
        fs::create_dir_all( dir.join( "ambient" ) ).unwrap();
        fs::write( dir.join( "b.FLAC" ), b"" ).unwrap();
        fs::write( dir.join( "a.mp3" ), b"" ).unwrap();
        fs::write( dir.join( "notes.txt" ), b"" ).unwrap();
        fs::write( dir.join( ".hidden.mp3" ), b"" ).unwrap();
        fs::write( dir.join( "Jazz" ).join( "so_what.ogg" ), b"" ).unwrap();
        dir
    }


    #[test]
    fn test_list_root_directories_first() {
        let dir = scratch_dir( "root" );
        let browser = FileBrowser::new( &dir );

        let items = browser.get_list( "/" ).unwrap();
        let names: Vec<_> = items.iter().map( |i| i.name.as_str() ).collect();
        assert_eq!( names, vec![ "ambient", "Jazz", "a.mp3", "b.FLAC", "notes.txt" ] );
        assert_eq!( items[ 0 ].item_type, ItemType::Directory );
        assert_eq!( items[ 3 ].item_type, ItemType::Media );
        assert_eq!( items[ 4 ].item_type, ItemType::File );

        fs::remove_dir_all( &dir ).unwrap();
    }


    #[test]
    fn test_list_subdirectory_paths() {
        let dir = scratch_dir( "sub" );
        let browser = FileBrowser::new( &dir );

        let items = browser.get_list( "Jazz" ).unwrap();
        assert_eq!( items.len(), 1 );
        assert_eq!( items[ 0 ].path, "Jazz/so_what.ogg" );

        fs::remove_dir_all( &dir ).unwrap();
    }


    #[test]
    fn test_rejects_escaping_paths() {
        let dir = scratch_dir( "escape" );
        let browser = FileBrowser::new( &dir );

        assert!( matches!( browser.get_list( "../" ), Err( BrowserError::InvalidPath( _ ) ) ) );
        assert!( matches!( browser.get_list( "Jazz/../../etc" ), Err( BrowserError::InvalidPath( _ ) ) ) );
        assert!( matches!( browser.get_list( "missing" ), Err( BrowserError::NotFound( _ ) ) ) );

        fs::remove_dir_all( &dir ).unwrap();
    }
}
