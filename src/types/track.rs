//! Static track reference table for the 2019 game.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub id: i8,
    pub name: &'static str,
    pub corners: u16,
}

pub const TRACKS: [TrackInfo; 25] = [
    TrackInfo { id: 0, name: "Melbourne", corners: 16 },
    TrackInfo { id: 1, name: "Paul Ricard", corners: 15 },
    TrackInfo { id: 2, name: "Shanghai", corners: 16 },
    TrackInfo { id: 3, name: "Sakhir (Bahrain)", corners: 15 },
    TrackInfo { id: 4, name: "Catalunya", corners: 16 },
    TrackInfo { id: 5, name: "Monaco", corners: 19 },
    TrackInfo { id: 6, name: "Montreal", corners: 14 },
    TrackInfo { id: 7, name: "Silverstone", corners: 18 },
    TrackInfo { id: 8, name: "Hockenheim", corners: 17 },
    TrackInfo { id: 9, name: "Hungaroring", corners: 14 },
    TrackInfo { id: 10, name: "Spa", corners: 19 },
    TrackInfo { id: 11, name: "Monza", corners: 11 },
    TrackInfo { id: 12, name: "Singapore", corners: 23 },
    TrackInfo { id: 13, name: "Suzuka", corners: 18 },
    TrackInfo { id: 14, name: "Abu Dhabi", corners: 21 },
    TrackInfo { id: 15, name: "Texas", corners: 20 },
    TrackInfo { id: 16, name: "Brazil", corners: 15 },
    TrackInfo { id: 17, name: "Austria", corners: 10 },
    TrackInfo { id: 18, name: "Sochi", corners: 18 },
    TrackInfo { id: 19, name: "Mexico", corners: 17 },
    TrackInfo { id: 20, name: "Baku (Azerbaijan)", corners: 20 },
    TrackInfo { id: 21, name: "Sakhir Short", corners: 11 },
    TrackInfo { id: 22, name: "Silverstone Short", corners: 13 },
    TrackInfo { id: 23, name: "Texas Short", corners: 12 },
    TrackInfo { id: 24, name: "Suzuka Short", corners: 13 },
];

pub fn lookup_track(id: i8) -> Option<&'static TrackInfo> {
    usize::try_from(id).ok().and_then(|idx| TRACKS.get(idx))
}
