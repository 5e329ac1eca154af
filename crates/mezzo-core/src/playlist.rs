//! Playlist capability
//!
//! An ordered queue of uniquely named media items with a current pointer,
//! optionally linked to the player that plays it.

use std::sync::{ Arc, Weak };

use serde::Serialize;
use thiserror::Error;

use crate::player::Player;
use crate::tags::{ Cover, TagFields, Tags };


/// Errors that can occur with playlist operations.
#[derive( Debug, Error )]
pub enum PlaylistError {
    #[error( "No item named '{0}'" )]
    NotFound( String ),

    #[error( "Item '{0}' cannot be played" )]
    NotPlayable( String ),

    #[error( "Item '{0}' cannot be removed" )]
    NotRemovable( String ),

    #[error( "No free name left for '{0}'" )]
    NamesExhausted( String ),

    #[error( "Playback failed: {0}" )]
    Playback( String ),
}


/// One queued media.
#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct PlaylistItem {
    /// Unique key within the playlist
    pub name: String,

    /// Display name
    pub full_name: Option<String>,

    /// Backend-specific locator
    pub path: String,

    pub tags: Option<Arc<Tags>>,
    pub can_play: bool,
    pub can_remove: bool,
}


impl PlaylistItem {
    /// Returns a copy with its tags reduced to `fields`.
    pub fn with_fields( self: &Arc<Self>, fields: TagFields ) -> Arc<PlaylistItem> {
        match self.tags {
            Some( ref tags ) if fields != TagFields::FULL => Arc::new( PlaylistItem {
                tags: Some( Tags::select( tags, fields ) ),
                ..PlaylistItem::clone( self )
            }),
            _ => Arc::clone( self ),
        }
    }
}


/// Snapshot of a playlist's content.
#[derive( Debug, Clone, Default, PartialEq, Serialize )]
pub struct PlaylistList {
    pub current: Option<String>,
    pub items: Vec<Arc<PlaylistItem>>,
}


/// Step direction through a playlist.
///
/// New items are inserted at the head, so `Prev` moves toward the tail (older
/// items) and `Next` toward the head (newer items).
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Direction {
    Prev,
    Next,
}


/// Item resolved by `Playlist::advance`.
#[derive( Debug, Clone, PartialEq )]
pub struct AdvanceTarget {
    pub path: String,
    pub name: String,
    pub tags: Option<Arc<Tags>>,
}


/// Capability interface of every playlist kind.
///
/// Implementations serialize mutations with one lock and must release it
/// before calling into the attached player.
pub trait Playlist: Send + Sync {
    fn id( &self ) -> &str;

    /// Links the player that plays this playlist.
    fn set_player( &self, player: Weak<Player> );

    /// Gets the linked player, if still alive.
    fn player( &self ) -> Option<Arc<Player>>;

    /// Inserts a media at the head of the playlist.
    ///
    /// Without `name`, the base name comes from `full_name`, then `path`.
    /// Taken names get a `_1`, `_2`, ... suffix.
    ///
    /// @returns The final, unique name
    fn add(
        &self,
        name: Option<&str>,
        full_name: Option<&str>,
        path: &str,
        tags: Option<Arc<Tags>>,
        make_current: bool,
    ) -> Result<String, PlaylistError>;

    /// Returns an independent copy of the content, head first.
    fn get_list( &self, fields: TagFields ) -> PlaylistList;

    fn contains( &self, name: &str ) -> bool;

    fn get_tags( &self, name: &str, fields: TagFields ) -> Option<Arc<Tags>>;

    /// Resolves the item next to the current one.
    ///
    /// @param set - Move `current` to the resolved item; otherwise peek
    fn advance( &self, direction: Direction, set: bool ) -> Option<AdvanceTarget>;

    /// Makes `name` current and asks the linked player to play it.
    fn play( &self, name: &str ) -> Result<(), PlaylistError>;

    /// Removes `name`; removing the current item idles the linked player.
    fn remove( &self, name: &str ) -> Result<(), PlaylistError>;

    fn get_cover( &self, name: &str ) -> Option<Cover>;

    /// Returns whether `advance(Prev)` and `advance(Next)` would succeed.
    fn has_prev_next( &self ) -> ( bool, bool );

    fn len( &self ) -> usize;

    fn is_empty( &self ) -> bool {
        self.len() == 0
    }

    /// Removes every item.
    fn clear( &self );
}
