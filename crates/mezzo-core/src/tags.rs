//! Media tags
//!
//! Descriptive metadata attached to playlist items and player status.
//! Tags are shared behind `Arc` and never mutated once handed out.

use std::ops::BitOr;
use std::sync::Arc;

use serde::{ Deserialize, Serialize };


/// Embedded cover art.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Cover {
    pub data: Arc<[u8]>,
    pub mime: String,
}


/// Track metadata.
#[derive( Debug, Clone, Default, PartialEq, Serialize, Deserialize )]
pub struct Tags {
    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub title: Option<String>,

    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub artist: Option<String>,

    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub album: Option<String>,

    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub genre: Option<String>,

    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub date: Option<u32>,

    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub track: Option<u32>,

    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub tracks: Option<u32>,

    /// Where clients can fetch the cover art from
    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub cover_url: Option<String>,

    /// Raw cover art, served out of band
    #[serde( skip )]
    pub cover: Option<Cover>,
}


impl Tags {
    /// Returns true if embedded cover data is present.
    pub fn has_cover( &self ) -> bool {
        self.cover.as_ref().is_some_and( |c| !c.data.is_empty() )
    }


    /// Returns true if no field is set.
    pub fn is_empty( &self ) -> bool {
        *self == Tags::default()
    }


    /// Returns a copy holding only the selected fields.
    pub fn filter( &self, fields: TagFields ) -> Tags {
        let pick = |flag: TagFields, value: &Option<String>| {
            if fields.contains( flag ) { value.clone() } else { None }
        };
        let pick_num = |flag: TagFields, value: Option<u32>| {
            if fields.contains( flag ) { value } else { None }
        };

        Tags {
            title: pick( TagFields::TITLE, &self.title ),
            artist: pick( TagFields::ARTIST, &self.artist ),
            album: pick( TagFields::ALBUM, &self.album ),
            genre: pick( TagFields::GENRE, &self.genre ),
            date: pick_num( TagFields::DATE, self.date ),
            track: pick_num( TagFields::TRACK, self.track ),
            tracks: pick_num( TagFields::TRACKS, self.tracks ),
            cover_url: pick( TagFields::COVER_URL, &self.cover_url ),
            cover: if fields.contains( TagFields::COVER ) { self.cover.clone() } else { None },
        }
    }


    /// Applies a field selection to shared tags, reusing the allocation
    /// when everything is selected.
    pub fn select( tags: &Arc<Tags>, fields: TagFields ) -> Arc<Tags> {
        if fields == TagFields::FULL {
            Arc::clone( tags )
        } else {
            Arc::new( tags.filter( fields ) )
        }
    }
}


/// Selection of tag fields to materialize.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub struct TagFields( u16 );


impl TagFields {
    pub const NONE: TagFields = TagFields( 0 );
    pub const TITLE: TagFields = TagFields( 1 << 0 );
    pub const ARTIST: TagFields = TagFields( 1 << 1 );
    pub const ALBUM: TagFields = TagFields( 1 << 2 );
    pub const GENRE: TagFields = TagFields( 1 << 3 );
    pub const DATE: TagFields = TagFields( 1 << 4 );
    pub const TRACK: TagFields = TagFields( 1 << 5 );
    pub const TRACKS: TagFields = TagFields( 1 << 6 );
    pub const COVER_URL: TagFields = TagFields( 1 << 7 );
    pub const COVER: TagFields = TagFields( 1 << 8 );
    pub const FULL: TagFields = TagFields( 0x1ff );


    /// Returns true if every field of `other` is selected.
    pub fn contains( self, other: TagFields ) -> bool {
        self.0 & other.0 == other.0
    }


    /// Parses a field list such as `["title", "artist"]`.
    ///
    /// `"full"` selects everything and `"none"` nothing; unknown names are
    /// ignored.
    pub fn from_names<I, S>( names: I ) -> TagFields
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().fold( TagFields::NONE, |acc, name| {
            let flag = match name.as_ref() {
                "full" => TagFields::FULL,
                "title" => TagFields::TITLE,
                "artist" => TagFields::ARTIST,
                "album" => TagFields::ALBUM,
                "genre" => TagFields::GENRE,
                "date" => TagFields::DATE,
                "track" => TagFields::TRACK,
                "tracks" => TagFields::TRACKS,
                "cover_url" => TagFields::COVER_URL,
                "cover" => TagFields::COVER,
                _ => TagFields::NONE,
            };
            acc | flag
        })
    }
}


impl BitOr for TagFields {
    type Output = TagFields;


    fn bitor( self, rhs: TagFields ) -> TagFields {
        TagFields( self.0 | rhs.0 )
    }
}


impl Default for TagFields {
    fn default() -> Self {
        TagFields::FULL
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn sample() -> Tags {
        Tags {
            title: Some( "So What".into() ),
            artist: Some( "Miles Davis".into() ),
            album: Some( "Kind of Blue".into() ),
            date: Some( 1959 ),
            cover: Some( Cover { data: Arc::from( vec![ 1u8, 2, 3 ] ), mime: "image/jpeg".into() } ),
            ..Tags::default()
        }
    }


    #[test]
    fn test_from_names() {
        let fields = TagFields::from_names( [ "title", "album", "bogus" ] );
        assert!( fields.contains( TagFields::TITLE ) );
        assert!( fields.contains( TagFields::ALBUM ) );
        assert!( !fields.contains( TagFields::ARTIST ) );

        assert_eq!( TagFields::from_names( [ "full" ] ), TagFields::FULL );
        assert_eq!( TagFields::from_names( [ "none" ] ), TagFields::NONE );
    }


    #[test]
    fn test_filter_keeps_selected_fields() {
        let filtered = sample().filter( TagFields::TITLE | TagFields::DATE );
        assert_eq!( filtered.title.as_deref(), Some( "So What" ) );
        assert_eq!( filtered.date, Some( 1959 ) );
        assert!( filtered.artist.is_none() );
        assert!( !filtered.has_cover() );
    }


    #[test]
    fn test_select_full_shares_allocation() {
        let tags = Arc::new( sample() );
        let same = Tags::select( &tags, TagFields::FULL );
        assert!( Arc::ptr_eq( &tags, &same ) );

        let none = Tags::select( &tags, TagFields::NONE );
        assert!( none.is_empty() );
    }


    #[test]
    fn test_cover_not_serialized() {
        let value = serde_json::to_value( sample() ).unwrap();
        assert_eq!( value[ "title" ], "So What" );
        assert!( value.get( "cover" ).is_none() );
        assert!( value.get( "genre" ).is_none() );
    }
}
