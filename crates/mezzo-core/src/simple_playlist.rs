//! In-memory playlist
//!
//! Items live in an arena of slots linked head to tail. The name index maps
//! each name to its slot, so lookups, insertions at the head and removals are
//! constant time and the index never owns an item.

use std::collections::HashMap;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex, RwLock, Weak };

use crate::player::Player;
use crate::playlist::{ AdvanceTarget, Direction, Playlist, PlaylistError, PlaylistItem, PlaylistList };
use crate::sync::{ lock, read, write };
use crate::tags::{ Cover, TagFields, Tags };


/// Highest collision suffix tried before `add` gives up.
pub const MAX_NAME_SUFFIX: u32 = 1000;


struct Slot {
    item: Arc<PlaylistItem>,
    /// Neighbour toward the head
    prev: Option<usize>,
    /// Neighbour toward the tail
    next: Option<usize>,
}


#[derive( Default )]
struct Queue {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    head: Option<usize>,
    names: HashMap<String, usize>,
    current: Option<usize>,
}


impl Queue {
    fn slot( &self, index: usize ) -> Option<&Slot> {
        self.slots.get( index ).and_then( Option::as_ref )
    }


    fn push_front( &mut self, item: Arc<PlaylistItem> ) -> usize {
        let slot = Slot { item, prev: None, next: self.head };
        let index = match self.free.pop() {
            Some( index ) => {
                self.slots[ index ] = Some( slot );
                index
            }
            None => {
                self.slots.push( Some( slot ) );
                self.slots.len() - 1
            }
        };

        if let Some( old_head ) = self.head {
            if let Some( Some( s ) ) = self.slots.get_mut( old_head ) {
                s.prev = Some( index );
            }
        }
        self.head = Some( index );
        index
    }


    fn unlink( &mut self, index: usize ) -> Option<Slot> {
        let slot = self.slots.get_mut( index )?.take()?;

        match slot.prev {
            Some( prev ) => {
                if let Some( Some( s ) ) = self.slots.get_mut( prev ) {
                    s.next = slot.next;
                }
            }
            None => self.head = slot.next,
        }
        if let Some( next ) = slot.next {
            if let Some( Some( s ) ) = self.slots.get_mut( next ) {
                s.prev = slot.prev;
            }
        }

        self.free.push( index );
        Some( slot )
    }


    /// Iterates items from head to tail.
    fn iter( &self ) -> impl Iterator<Item = &Arc<PlaylistItem>> + '_ {
        std::iter::successors( self.head.and_then( |i| self.slot( i ) ), move |s| {
            s.next.and_then( |i| self.slot( i ) )
        })
        .map( |s| &s.item )
    }


    fn neighbour( &self, index: usize, direction: Direction ) -> Option<usize> {
        let slot = self.slot( index )?;
        match direction {
            Direction::Prev => slot.next,
            Direction::Next => slot.prev,
        }
    }


    fn unique_name( &self, base: &str, limit: u32 ) -> Option<String> {
        if !self.names.contains_key( base ) {
            return Some( base.to_string() );
        }
        ( 1..=limit )
            .map( |i| format!( "{}_{}", base, i ) )
            .find( |candidate| !self.names.contains_key( candidate ) )
    }
}


/// Playlist kept entirely in memory, newest item first.
pub struct SimplePlaylist {
    id: String,
    queue: Mutex<Queue>,
    player: RwLock<Weak<Player>>,
    override_cover_url: AtomicBool,
    name_limit: u32,
}


impl SimplePlaylist {
    /// Creates an empty playlist.
    pub fn new( id: &str ) -> Self {
        Self::with_name_limit( id, MAX_NAME_SUFFIX )
    }


    /// Creates an empty playlist with a custom collision suffix ceiling.
    pub fn with_name_limit( id: &str, name_limit: u32 ) -> Self {
        Self {
            id: id.to_string(),
            queue: Mutex::new( Queue::default() ),
            player: RwLock::new( Weak::new() ),
            override_cover_url: AtomicBool::new( false ),
            name_limit,
        }
    }


    /// When enabled, added items carrying cover art get a cover URL pointing
    /// at this playlist.
    pub fn set_cover_url_override( &self, enabled: bool ) {
        self.override_cover_url.store( enabled, Ordering::Relaxed );
    }


    /// Returns the URL clients use to fetch an item's cover.
    pub fn cover_url( &self, name: &str ) -> String {
        format!( "/cover/playlist/{}/{}", self.id, name )
    }


    fn sync_player( &self, player: Option<&Arc<Player>> ) {
        if let Some( player ) = player {
            player.sync_playlist_flags();
        }
    }


    fn flags( queue: &Queue ) -> ( bool, bool ) {
        match queue.current {
            Some( current ) => (
                queue.neighbour( current, Direction::Prev ).is_some(),
                queue.neighbour( current, Direction::Next ).is_some(),
            ),
            None => ( false, false ),
        }
    }
}


impl Playlist for SimplePlaylist {
    fn id( &self ) -> &str {
        &self.id
    }


    fn set_player( &self, player: Weak<Player> ) {
        *write( &self.player ) = player;
    }


    fn player( &self ) -> Option<Arc<Player>> {
        read( &self.player ).upgrade()
    }


    fn add(
        &self,
        name: Option<&str>,
        full_name: Option<&str>,
        path: &str,
        tags: Option<Arc<Tags>>,
        make_current: bool,
    ) -> Result<String, PlaylistError> {
        let base = name.or( full_name ).unwrap_or( path );

        let final_name = {
            let mut queue = lock( &self.queue );
            let final_name = queue.unique_name( base, self.name_limit )
                .ok_or_else( || PlaylistError::NamesExhausted( base.to_string() ) )?;

            let tags = match tags {
                Some( tags ) if tags.has_cover() && self.override_cover_url.load( Ordering::Relaxed ) => {
                    Some( Arc::new( Tags {
                        cover_url: Some( self.cover_url( &final_name ) ),
                        ..Tags::clone( &tags )
                    }))
                }
                other => other,
            };

            let index = queue.push_front( Arc::new( PlaylistItem {
                name: final_name.clone(),
                full_name: full_name.map( str::to_string ),
                path: path.to_string(),
                tags,
                can_play: true,
                can_remove: true,
            }));
            queue.names.insert( final_name.clone(), index );
            if make_current {
                queue.current = Some( index );
            }
            final_name
        };

        tracing::debug!( "Playlist {}: added '{}'", self.id, final_name );
        self.sync_player( self.player().as_ref() );
        Ok( final_name )
    }


    fn get_list( &self, fields: TagFields ) -> PlaylistList {
        let queue = lock( &self.queue );
        PlaylistList {
            current: queue.current
                .and_then( |i| queue.slot( i ) )
                .map( |s| s.item.name.clone() ),
            items: queue.iter().map( |item| item.with_fields( fields ) ).collect(),
        }
    }


    fn contains( &self, name: &str ) -> bool {
        lock( &self.queue ).names.contains_key( name )
    }


    fn get_tags( &self, name: &str, fields: TagFields ) -> Option<Arc<Tags>> {
        let queue = lock( &self.queue );
        let index = *queue.names.get( name )?;
        let tags = queue.slot( index )?.item.tags.as_ref()?;
        Some( Tags::select( tags, fields ) )
    }


    fn advance( &self, direction: Direction, set: bool ) -> Option<AdvanceTarget> {
        let mut queue = lock( &self.queue );
        let target = queue.neighbour( queue.current?, direction )?;
        let item = Arc::clone( &queue.slot( target )?.item );
        if set {
            queue.current = Some( target );
        }

        Some( AdvanceTarget {
            path: item.path.clone(),
            name: item.name.clone(),
            tags: item.tags.clone(),
        })
    }


    fn play( &self, name: &str ) -> Result<(), PlaylistError> {
        let ( item, index, previous ) = {
            let mut queue = lock( &self.queue );
            let index = *queue.names.get( name )
                .ok_or_else( || PlaylistError::NotFound( name.to_string() ) )?;
            let item = queue.slot( index )
                .map( |s| Arc::clone( &s.item ) )
                .ok_or_else( || PlaylistError::NotFound( name.to_string() ) )?;
            if !item.can_play {
                return Err( PlaylistError::NotPlayable( name.to_string() ) );
            }
            let previous = queue.current.replace( index );
            ( item, index, previous )
        };

        tracing::debug!( "Playlist {}: playing '{}'", self.id, item.name );
        let Some( player ) = self.player() else {
            return Ok(());
        };

        if let Err( e ) = player.play( &item.path, Some( &item.name ), item.tags.clone(), false ) {
            let mut queue = lock( &self.queue );
            let still_valid = previous.map_or( true, |p| queue.slot( p ).is_some() );
            if queue.current == Some( index ) && still_valid {
                queue.current = previous;
            }
            return Err( PlaylistError::Playback( e.to_string() ) );
        }
        self.sync_player( Some( &player ) );
        Ok(())
    }


    fn remove( &self, name: &str ) -> Result<(), PlaylistError> {
        let was_current = {
            let mut queue = lock( &self.queue );
            let index = *queue.names.get( name )
                .ok_or_else( || PlaylistError::NotFound( name.to_string() ) )?;
            if queue.slot( index ).is_some_and( |s| !s.item.can_remove ) {
                return Err( PlaylistError::NotRemovable( name.to_string() ) );
            }

            queue.unlink( index );
            queue.names.remove( name );
            let was_current = queue.current == Some( index );
            if was_current {
                queue.current = None;
            }
            was_current
        };

        tracing::debug!( "Playlist {}: removed '{}'", self.id, name );
        let player = self.player();
        if was_current {
            if let Some( ref player ) = player {
                player.force_idle();
            }
        }
        self.sync_player( player.as_ref() );
        Ok(())
    }


    fn get_cover( &self, name: &str ) -> Option<Cover> {
        let queue = lock( &self.queue );
        let index = *queue.names.get( name )?;
        queue.slot( index )?.item.tags.as_ref()?.cover.clone()
    }


    fn has_prev_next( &self ) -> ( bool, bool ) {
        Self::flags( &lock( &self.queue ) )
    }


    fn len( &self ) -> usize {
        lock( &self.queue ).names.len()
    }


    fn clear( &self ) {
        let had_current = {
            let mut queue = lock( &self.queue );
            let had_current = queue.current.is_some();
            *queue = Queue::default();
            had_current
        };

        let player = self.player();
        if had_current {
            if let Some( ref player ) = player {
                player.force_idle();
            }
        }
        self.sync_player( player.as_ref() );
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use crate::player::tests::test_player;
    use crate::player::Capabilities;
    use crate::status::PlayerState;


    fn names( playlist: &SimplePlaylist ) -> Vec<String> {
        playlist.get_list( TagFields::FULL ).items.iter().map( |i| i.name.clone() ).collect()
    }


    #[test]
    fn test_add_suffixes_colliding_names() {
        let playlist = SimplePlaylist::new( "pl" );
        assert_eq!( playlist.add( Some( "Track" ), None, "/a", None, false ).unwrap(), "Track" );
        assert_eq!( playlist.add( Some( "Track" ), None, "/b", None, false ).unwrap(), "Track_1" );
        assert_eq!( playlist.add( Some( "Track" ), None, "/c", None, false ).unwrap(), "Track_2" );
        assert_eq!( names( &playlist ), vec![ "Track_2", "Track_1", "Track" ] );
    }


    #[test]
    fn test_add_derives_name_from_full_name_then_path() {
        let playlist = SimplePlaylist::new( "pl" );
        assert_eq!( playlist.add( None, Some( "Blue in Green" ), "/b.flac", None, false ).unwrap(), "Blue in Green" );
        assert_eq!( playlist.add( None, None, "/c.flac", None, false ).unwrap(), "/c.flac" );

        let list = playlist.get_list( TagFields::FULL );
        assert_eq!( list.items[ 1 ].full_name.as_deref(), Some( "Blue in Green" ) );
        assert_eq!( list.items[ 0 ].full_name, None );
    }


    #[test]
    fn test_add_fails_when_names_exhausted() {
        let playlist = SimplePlaylist::with_name_limit( "pl", 2 );
        for _ in 0..3 {
            playlist.add( Some( "x" ), None, "/x", None, false ).unwrap();
        }
        assert!( matches!(
            playlist.add( Some( "x" ), None, "/x", None, false ),
            Err( PlaylistError::NamesExhausted( _ ) )
        ));
        assert_eq!( playlist.len(), 3 );
    }


    #[test]
    fn test_add_make_current() {
        let playlist = SimplePlaylist::new( "pl" );
        playlist.add( Some( "a" ), None, "/a", None, true ).unwrap();
        playlist.add( Some( "b" ), None, "/b", None, false ).unwrap();
        assert_eq!( playlist.get_list( TagFields::FULL ).current.as_deref(), Some( "a" ) );
    }


    #[test]
    fn test_get_list_is_independent_copy() {
        let playlist = SimplePlaylist::new( "pl" );
        playlist.add( Some( "a" ), None, "/a", None, false ).unwrap();
        let list = playlist.get_list( TagFields::FULL );

        playlist.add( Some( "b" ), None, "/b", None, false ).unwrap();
        playlist.remove( "a" ).unwrap();

        assert_eq!( list.items.len(), 1 );
        assert_eq!( list.items[ 0 ].name, "a" );
    }


    #[test]
    fn test_get_list_selects_tag_fields() {
        let playlist = SimplePlaylist::new( "pl" );
        let tags = Arc::new( Tags {
            title: Some( "Title".into() ),
            artist: Some( "Artist".into() ),
            ..Tags::default()
        });
        playlist.add( Some( "a" ), None, "/a", Some( tags ), false ).unwrap();

        let list = playlist.get_list( TagFields::TITLE );
        let item_tags = list.items[ 0 ].tags.as_ref().unwrap();
        assert_eq!( item_tags.title.as_deref(), Some( "Title" ) );
        assert!( item_tags.artist.is_none() );

        let full = playlist.get_tags( "a", TagFields::FULL ).unwrap();
        assert_eq!( full.artist.as_deref(), Some( "Artist" ) );
        assert!( playlist.get_tags( "missing", TagFields::FULL ).is_none() );
    }


    #[test]
    fn test_advance_literal_directions() {
        let playlist = SimplePlaylist::new( "pl" );
        playlist.add( Some( "old" ), None, "/old", None, false ).unwrap();
        playlist.add( Some( "mid" ), None, "/mid", None, true ).unwrap();
        playlist.add( Some( "new" ), None, "/new", None, false ).unwrap();

        // Peek does not move current
        assert_eq!( playlist.advance( Direction::Prev, false ).unwrap().name, "old" );
        assert_eq!( playlist.advance( Direction::Next, false ).unwrap().name, "new" );
        assert_eq!( playlist.get_list( TagFields::FULL ).current.as_deref(), Some( "mid" ) );

        let target = playlist.advance( Direction::Next, true ).unwrap();
        assert_eq!( target.path, "/new" );
        assert_eq!( playlist.get_list( TagFields::FULL ).current.as_deref(), Some( "new" ) );
        assert!( playlist.advance( Direction::Next, true ).is_none() );
        assert_eq!( playlist.has_prev_next(), ( true, false ) );
    }


    #[test]
    fn test_advance_without_current() {
        let playlist = SimplePlaylist::new( "pl" );
        playlist.add( Some( "a" ), None, "/a", None, false ).unwrap();
        assert!( playlist.advance( Direction::Next, true ).is_none() );
        assert_eq!( playlist.has_prev_next(), ( false, false ) );
    }


    #[test]
    fn test_play_missing_keeps_current() {
        let playlist = SimplePlaylist::new( "pl" );
        playlist.add( Some( "a" ), None, "/a", None, true ).unwrap();

        assert!( matches!( playlist.play( "missing" ), Err( PlaylistError::NotFound( _ ) ) ) );
        assert_eq!( playlist.get_list( TagFields::FULL ).current.as_deref(), Some( "a" ) );
    }


    #[test]
    fn test_play_drives_linked_player() {
        let bus = Arc::new( EventBus::new() );
        let ( player, calls ) = test_player( &bus, Capabilities::all() );
        let playlist = Arc::new( SimplePlaylist::new( "pl" ) );
        player.set_playlist( Some( playlist.clone() ) );
        playlist.add( Some( "a" ), None, "/a.ogg", None, false ).unwrap();

        playlist.play( "a" ).unwrap();

        assert_eq!( *calls.lock().unwrap(), vec![ "play /a.ogg" ] );
        assert_eq!( player.status().media_name().as_deref(), Some( "a" ) );
    }


    #[test]
    fn test_play_rejected_by_player_keeps_current() {
        let bus = Arc::new( EventBus::new() );
        let ( player, calls ) = test_player( &bus, Capabilities { play: false, ..Capabilities::all() } );
        let playlist = Arc::new( SimplePlaylist::new( "pl" ) );
        player.set_playlist( Some( playlist.clone() ) );
        playlist.add( Some( "a" ), None, "/a", None, true ).unwrap();
        playlist.add( Some( "b" ), None, "/b", None, false ).unwrap();
        let flags = player.get_status().0;

        assert!( matches!( playlist.play( "b" ), Err( PlaylistError::Playback( _ ) ) ) );

        assert_eq!( playlist.get_list( TagFields::NONE ).current.as_deref(), Some( "a" ) );
        let status = player.get_status().0;
        assert_eq!( ( status.has_prev, status.has_next ), ( flags.has_prev, flags.has_next ) );
        assert!( calls.lock().unwrap().is_empty() );
    }


    #[test]
    fn test_remove_current_idles_player() {
        let bus = Arc::new( EventBus::new() );
        let ( player, _ ) = test_player( &bus, Capabilities::all() );
        let playlist = Arc::new( SimplePlaylist::new( "pl" ) );
        player.set_playlist( Some( playlist.clone() ) );
        playlist.add( Some( "a" ), None, "/a", None, false ).unwrap();
        playlist.play( "a" ).unwrap();
        player.status().set_state( PlayerState::Playing );

        playlist.remove( "a" ).unwrap();

        assert_eq!( playlist.get_list( TagFields::FULL ).current, None );
        assert_eq!( player.status().state(), PlayerState::None );
        assert!( playlist.is_empty() );
    }


    #[test]
    fn test_remove_missing_has_no_side_effect() {
        let playlist = SimplePlaylist::new( "pl" );
        playlist.add( Some( "a" ), None, "/a", None, true ).unwrap();
        let before = playlist.get_list( TagFields::FULL );

        assert!( matches!( playlist.remove( "b" ), Err( PlaylistError::NotFound( _ ) ) ) );
        assert_eq!( playlist.get_list( TagFields::FULL ), before );
    }


    #[test]
    fn test_remove_middle_relinks_neighbours() {
        let playlist = SimplePlaylist::new( "pl" );
        for name in [ "a", "b", "c" ] {
            playlist.add( Some( name ), None, name, None, false ).unwrap();
        }
        playlist.remove( "b" ).unwrap();
        assert_eq!( names( &playlist ), vec![ "c", "a" ] );

        // Freed slot is reused and the name can be taken again
        playlist.add( Some( "b" ), None, "b", None, false ).unwrap();
        assert_eq!( names( &playlist ), vec![ "b", "c", "a" ] );
    }


    #[test]
    fn test_cover_url_override() {
        let playlist = SimplePlaylist::new( "pl" );
        playlist.set_cover_url_override( true );
        let tags = Arc::new( Tags {
            cover: Some( Cover { data: Arc::from( vec![ 0xffu8, 0xd8 ] ), mime: "image/jpeg".into() } ),
            ..Tags::default()
        });
        playlist.add( Some( "a" ), None, "/a", Some( tags ), false ).unwrap();

        let item_tags = playlist.get_tags( "a", TagFields::FULL ).unwrap();
        assert_eq!( item_tags.cover_url.as_deref(), Some( "/cover/playlist/pl/a" ) );

        let cover = playlist.get_cover( "a" ).unwrap();
        assert_eq!( cover.mime, "image/jpeg" );
        assert_eq!( &*cover.data, &[ 0xff, 0xd8 ] );
        assert!( playlist.get_cover( "nope" ).is_none() );
    }


    #[test]
    fn test_clear_idles_player() {
        let bus = Arc::new( EventBus::new() );
        let ( player, _ ) = test_player( &bus, Capabilities::all() );
        let playlist = Arc::new( SimplePlaylist::new( "pl" ) );
        player.set_playlist( Some( playlist.clone() ) );
        playlist.add( Some( "a" ), None, "/a", None, true ).unwrap();
        player.status().set_state( PlayerState::Paused );

        playlist.clear();

        assert!( playlist.is_empty() );
        assert_eq!( player.status().state(), PlayerState::None );
    }
}
