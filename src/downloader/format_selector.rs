// SmartFormatSelector - scores candidate formats and picks one
//
// Scoring, highest wins:
// - Resolution (exact match with the remembered height beats any tier)
// - Codec compatibility (H.264 first)
// - File size sweet spot, penalty above 2 GiB
// - Frame rate and HDR bonuses
//
// When the winner is over the size limit, the next format under the limit
// is used; if there is none the caller has to confirm.

use serde::Serialize;
use tracing::{debug, info};

use super::models::{DownloadOptions, FormatDescriptor};
use super::preferences::UserPreference;

/// Token handed to yt-dlp when no video format qualifies
pub const VIDEO_FALLBACK: &str = "bestvideo+bestaudio/best";

/// Token handed to yt-dlp when no audio format qualifies
pub const AUDIO_FALLBACK: &str = "bestaudio/best";

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

const PREFERRED_HEIGHT_SCORE: i32 = 50;

/// Substring match, first entry wins
const CODEC_SCORES: [(&str, i32); 7] = [
    ("h264", 10),
    ("avc1", 10),
    ("h265", 9),
    ("hevc", 9),
    ("vp9", 8),
    ("av01", 7),
    ("vp8", 5),
];

/// Outcome of format selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selection {
    /// Format id, or one of the fallback tokens
    Selected(String),
    /// Best candidate is over the limit and nothing smaller exists
    NeedsConfirmation {
        format_id: String,
        size_bytes: u64,
        limit_bytes: u64,
    },
    /// Formats could not be obtained at all
    NotFound,
}

impl Selection {
    pub fn format_id(&self) -> Option<&str> {
        match self {
            Self::Selected(id) => Some(id),
            _ => None,
        }
    }
}

/// Format selector with preference-aware scoring
pub struct SmartFormatSelector;

impl SmartFormatSelector {
    /// Pick the best format for the given mode.
    ///
    /// Records the chosen height as the preferred height the first time a
    /// video format is picked directly.
    pub fn select_best_format(
        formats: &[FormatDescriptor],
        preferences: &mut UserPreference,
        audio_only: bool,
    ) -> Selection {
        if audio_only {
            return Self::select_best_audio(formats);
        }
        Self::select_best_video(formats, preferences)
    }

    fn select_best_video(formats: &[FormatDescriptor], preferences: &mut UserPreference) -> Selection {
        let mut candidates: Vec<(i32, &FormatDescriptor)> = formats
            .iter()
            .filter(|f| f.has_video() && f.height.is_some())
            .map(|f| (Self::score_format(f, preferences.preferred_height), f))
            .collect();

        if candidates.is_empty() {
            debug!("No scorable video formats, using fallback");
            return Selection::Selected(VIDEO_FALLBACK.to_string());
        }

        // Vec::sort_by is stable, ties keep extractor order
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let (best_score, best) = candidates[0];
        let limit = preferences.max_file_size_bytes;
        let best_size = best.file_size_bytes.unwrap_or(0);

        if best_size > limit {
            let smaller = candidates[1..]
                .iter()
                .map(|(_, f)| *f)
                .find(|f| f.file_size_bytes.unwrap_or(0) < limit);

            return match smaller {
                Some(f) => {
                    info!(
                        format_id = %f.id,
                        skipped = %best.id,
                        "Best format over size limit, using smaller one"
                    );
                    Selection::Selected(f.id.clone())
                }
                None => Selection::NeedsConfirmation {
                    format_id: best.id.clone(),
                    size_bytes: best_size,
                    limit_bytes: limit,
                },
            };
        }

        if preferences.preferred_height.is_none() {
            preferences.preferred_height = best.height;
        }

        info!(
            format_id = %best.id,
            height = best.height.unwrap_or(0),
            codec = %best.codec,
            score = best_score,
            "Selected format"
        );
        Selection::Selected(best.id.clone())
    }

    fn select_best_audio(formats: &[FormatDescriptor]) -> Selection {
        let mut audio: Vec<&FormatDescriptor> = formats.iter().filter(|f| f.is_audio_only()).collect();

        if audio.is_empty() {
            return Selection::Selected(AUDIO_FALLBACK.to_string());
        }

        audio.sort_by(|a, b| {
            let key_a = (a.audio_bitrate.unwrap_or(0.0), a.sample_rate.unwrap_or(0));
            let key_b = (b.audio_bitrate.unwrap_or(0.0), b.sample_rate.unwrap_or(0));
            key_b
                .0
                .total_cmp(&key_a.0)
                .then_with(|| key_b.1.cmp(&key_a.1))
        });

        Selection::Selected(audio[0].id.clone())
    }

    /// Heuristic score of one video format
    pub fn score_format(format: &FormatDescriptor, preferred_height: Option<u32>) -> i32 {
        let mut score = 0;
        let height = format.height.unwrap_or(0);

        if preferred_height.is_some_and(|p| p == height) {
            score += PREFERRED_HEIGHT_SCORE;
        } else {
            score += match height {
                h if h >= 1080 => 40,
                h if h >= 720 => 35,
                h if h >= 480 => 25,
                _ => 10,
            };
        }

        let codec = format.codec.to_lowercase();
        if let Some((_, bonus)) = CODEC_SCORES.iter().find(|(name, _)| codec.contains(name)) {
            score += bonus;
        }

        if let Some(size) = format.file_size_bytes {
            if (500 * MIB..=2 * GIB).contains(&size) {
                score += 15;
            } else if size > 2 * GIB {
                score -= 20;
            }
        }

        if let Some(fps) = format.frame_rate {
            if fps >= 60.0 {
                score += 10;
            } else if fps >= 30.0 {
                score += 5;
            }
        }

        if format.is_hdr() {
            score += 5;
        }

        score
    }

    /// yt-dlp `-f` expression for non-smart downloads
    pub fn format_spec(options: &DownloadOptions) -> String {
        if options.audio_only {
            return AUDIO_FALLBACK.to_string();
        }
        if let Some(id) = &options.format_id {
            return id.clone();
        }
        match options.quality {
            Some(q) => format!("bestvideo[height<={q}]+bestaudio/best[height<={q}]"),
            None => VIDEO_FALLBACK.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::DynamicRange;

    fn make_video_format(id: &str, height: u32, codec: &str, size: Option<u64>) -> FormatDescriptor {
        FormatDescriptor {
            id: id.to_string(),
            ext: "mp4".to_string(),
            height: Some(height),
            width: Some(height * 16 / 9),
            codec: codec.to_string(),
            audio_codec: "none".to_string(),
            frame_rate: Some(30.0),
            file_size_bytes: size,
            ..Default::default()
        }
    }

    fn make_audio_format(id: &str, abr: f64, asr: u32) -> FormatDescriptor {
        FormatDescriptor {
            id: id.to_string(),
            ext: "m4a".to_string(),
            codec: "none".to_string(),
            audio_codec: "mp4a.40.2".to_string(),
            audio_bitrate: Some(abr),
            sample_rate: Some(asr),
            ..Default::default()
        }
    }

    fn prefs() -> UserPreference {
        UserPreference::default()
    }

    #[test]
    fn test_size_penalty_prefers_smaller_file() {
        let formats = vec![
            make_video_format("big", 1080, "avc1.640028", Some(3 * GIB)),
            make_video_format("mid", 1080, "avc1.640028", Some(1200 * MIB)),
        ];
        let mut p = prefs();

        let selection = SmartFormatSelector::select_best_format(&formats, &mut p, false);
        assert_eq!(selection, Selection::Selected("mid".to_string()));
    }

    #[test]
    fn test_preferred_height_wins() {
        let formats = vec![
            make_video_format("1080", 1080, "avc1", None),
            make_video_format("720", 720, "avc1", None),
        ];
        let mut p = UserPreference {
            preferred_height: Some(720),
            ..prefs()
        };

        let selection = SmartFormatSelector::select_best_format(&formats, &mut p, false);
        assert_eq!(selection, Selection::Selected("720".to_string()));
    }

    #[test]
    fn test_preferred_height_seeded_once() {
        let formats = vec![make_video_format("1080", 1080, "avc1", None)];
        let mut p = prefs();

        SmartFormatSelector::select_best_format(&formats, &mut p, false);
        assert_eq!(p.preferred_height, Some(1080));

        let formats = vec![make_video_format("720", 720, "avc1", None)];
        SmartFormatSelector::select_best_format(&formats, &mut p, false);
        assert_eq!(p.preferred_height, Some(1080));
    }

    #[test]
    fn test_oversized_without_alternative_needs_confirmation() {
        let formats = vec![
            make_video_format("huge", 2160, "vp9", Some(5 * GIB)),
            make_video_format("also-huge", 1440, "vp9", Some(3 * GIB)),
        ];
        let mut p = prefs();

        let selection = SmartFormatSelector::select_best_format(&formats, &mut p, false);
        assert_eq!(
            selection,
            Selection::NeedsConfirmation {
                format_id: "huge".to_string(),
                size_bytes: 5 * GIB,
                limit_bytes: 2 * GIB,
            }
        );
        assert_eq!(p.preferred_height, None);
    }

    #[test]
    fn test_empty_video_list_uses_fallback() {
        let formats = vec![make_audio_format("140", 128.0, 44100)];
        let mut p = prefs();

        let selection = SmartFormatSelector::select_best_format(&formats, &mut p, false);
        assert_eq!(selection, Selection::Selected(VIDEO_FALLBACK.to_string()));
    }

    #[test]
    fn test_audio_sorted_by_bitrate_then_sample_rate() {
        let formats = vec![
            make_audio_format("low", 64.0, 48000),
            make_audio_format("high-44", 160.0, 44100),
            make_audio_format("high-48", 160.0, 48000),
            make_video_format("v", 720, "avc1", None),
        ];
        let mut p = prefs();

        let selection = SmartFormatSelector::select_best_format(&formats, &mut p, true);
        assert_eq!(selection, Selection::Selected("high-48".to_string()));

        let none: Vec<FormatDescriptor> = Vec::new();
        let selection = SmartFormatSelector::select_best_format(&none, &mut p, true);
        assert_eq!(selection, Selection::Selected(AUDIO_FALLBACK.to_string()));
    }

    #[test]
    fn test_score_components() {
        let mut f = make_video_format("x", 1080, "avc1.64001F", Some(800 * MIB));
        f.frame_rate = Some(60.0);
        f.dynamic_range = Some(DynamicRange::Hdr);
        // 40 tier + 10 codec + 15 size + 10 fps + 5 hdr
        assert_eq!(SmartFormatSelector::score_format(&f, None), 80);
        // exact preference replaces the tier
        assert_eq!(SmartFormatSelector::score_format(&f, Some(1080)), 90);

        let g = make_video_format("y", 360, "unknown", None);
        assert_eq!(SmartFormatSelector::score_format(&g, None), 15);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let formats = vec![
            make_video_format("first", 1080, "vp9", None),
            make_video_format("second", 1080, "vp9", None),
        ];
        let mut p = prefs();
        let selection = SmartFormatSelector::select_best_format(&formats, &mut p, false);
        assert_eq!(selection.format_id(), Some("first"));
    }

    #[test]
    fn test_format_spec() {
        let mut opts = DownloadOptions::default();
        assert_eq!(SmartFormatSelector::format_spec(&opts), VIDEO_FALLBACK);

        opts.quality = Some(720);
        assert_eq!(
            SmartFormatSelector::format_spec(&opts),
            "bestvideo[height<=720]+bestaudio/best[height<=720]"
        );

        opts.format_id = Some("137".to_string());
        assert_eq!(SmartFormatSelector::format_spec(&opts), "137");

        opts.audio_only = true;
        assert_eq!(SmartFormatSelector::format_spec(&opts), AUDIO_FALLBACK);
    }
}
