//! Tag probing via Symphonia
//!
//! Reads embedded metadata and cover art from local media files.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{ MetadataOptions, MetadataRevision, StandardTagKey, StandardVisualKey };
use symphonia::core::probe::{ Hint, ProbeResult };
use thiserror::Error;

use crate::tags::{ Cover, Tags };


/// Errors that can occur while probing a file.
#[derive( Debug, Error )]
pub enum ProbeError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Unsupported format" )]
    UnsupportedFormat,
}


/// Reads the tags embedded in a media file.
///
/// Container-level metadata (ID3 and the like) takes precedence over the
/// format reader's own metadata; the first value seen for a field wins.
pub fn read_tags( path: &Path ) -> Result<Tags, ProbeError> {
    let mut probed = open( path )?;
    let mut tags = Tags::default();

    if let Some( metadata_log ) = probed.metadata.get() {
        if let Some( revision ) = metadata_log.current() {
            merge_revision( &mut tags, revision );
        }
    }

    if let Some( revision ) = probed.format.metadata().current() {
        merge_revision( &mut tags, revision );
    }

    tracing::debug!( "Probed {}: {:?}", path.display(), tags.title );
    Ok( tags )
}


/// Reads the duration (in ms) of the first audio track, if the container
/// declares one.
pub fn read_duration( path: &Path ) -> Result<Option<u64>, ProbeError> {
    let probed = open( path )?;

    let duration = probed.format
        .tracks()
        .iter()
        .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
        .and_then( |track| frames_to_ms( track.codec_params.n_frames?, track.codec_params.sample_rate ) );
    Ok( duration )
}


/// Converts a frame count to milliseconds; malformed rates give `None`.
fn frames_to_ms( frames: u64, sample_rate: Option<u32> ) -> Option<u64> {
    let sample_rate = sample_rate.unwrap_or( 44100 );
    if sample_rate == 0 {
        return None;
    }
    Some( frames.checked_mul( 1000 )? / u64::from( sample_rate ) )
}


fn open( path: &Path ) -> Result<ProbeResult, ProbeError> {
    let file = File::open( path )?;
    let mss = MediaSourceStream::new( Box::new( file ), Default::default() );

    // Provide hint based on file extension
    let mut hint = Hint::new();
    if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
        hint.with_extension( ext );
    }

    symphonia::default::get_probe()
        .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
        .map_err( |_| ProbeError::UnsupportedFormat )
}


fn merge_revision( tags: &mut Tags, revision: &MetadataRevision ) {
    for tag in revision.tags() {
        let Some( key ) = tag.std_key else {
            continue;
        };
        let value = tag.value.to_string();

        match key {
            StandardTagKey::TrackTitle => set_once( &mut tags.title, value ),
            StandardTagKey::Artist => set_once( &mut tags.artist, value ),
            StandardTagKey::Album => set_once( &mut tags.album, value ),
            StandardTagKey::Genre => set_once( &mut tags.genre, value ),
            StandardTagKey::TrackNumber => {
                if tags.track.is_none() {
                    tags.track = leading_number( &value );
                }
            }
            StandardTagKey::TrackTotal => {
                if tags.tracks.is_none() {
                    tags.tracks = leading_number( &value );
                }
            }
            StandardTagKey::Date | StandardTagKey::ReleaseDate => {
                if tags.date.is_none() {
                    tags.date = leading_number( &value );
                }
            }
            _ => {}
        }
    }

    if tags.cover.is_none() {
        let visuals = revision.visuals();
        let visual = visuals.iter()
            .find( |v| v.usage == Some( StandardVisualKey::FrontCover ) )
            .or_else( || visuals.first() );

        if let Some( visual ) = visual {
            tags.cover = Some( Cover {
                data: Arc::from( &*visual.data ),
                mime: visual.media_type.clone(),
            });
        }
    }
}


fn set_once( field: &mut Option<String>, value: String ) {
    if field.is_none() && !value.is_empty() {
        *field = Some( value );
    }
}


/// Parses the leading digits of values like "2023-01-15" or "3/12".
fn leading_number( value: &str ) -> Option<u32> {
    let digits: String = value.trim().chars().take_while( |c| c.is_ascii_digit() ).collect();
    digits.parse().ok()
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_leading_number() {
        assert_eq!( leading_number( "2023-01-15" ), Some( 2023 ) );
        assert_eq!( leading_number( "3/12" ), Some( 3 ) );
        assert_eq!( leading_number( "unknown" ), None );
    }


    #[test]
    fn test_frames_to_ms() {
        assert_eq!( frames_to_ms( 441_000, Some( 44100 ) ), Some( 10_000 ) );
        assert_eq!( frames_to_ms( 48_000, None ), Some( 1088 ) );
        assert_eq!( frames_to_ms( 1_000, Some( 0 ) ), None );
        assert_eq!( frames_to_ms( u64::MAX, Some( 44100 ) ), None );
    }


    #[test]
    fn test_missing_file_is_io_error() {
        let result = read_tags( Path::new( "/nonexistent/mezzo/track.flac" ) );
        assert!( matches!( result, Err( ProbeError::Io( _ ) ) ) );
    }


    #[test]
    fn test_garbage_is_unsupported() {
        let path = std::env::temp_dir().join( format!( "mezzo-probe-{}.bin", std::process::id() ) );
        std::fs::write( &path, b"definitely not audio" ).unwrap();

        assert!( matches!( read_tags( &path ), Err( ProbeError::UnsupportedFormat ) ) );
        assert!( matches!( read_duration( &path ), Err( ProbeError::UnsupportedFormat ) ) );

        std::fs::remove_file( &path ).unwrap();
    }
}
