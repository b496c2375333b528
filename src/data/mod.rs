/// Data layer: spectra, image cubes and endmember rosters.
///
/// Architecture:
/// ```text
///   raw cube + wavelengths        reference spectra
///        │                              │
///        ▼                              ▼
///   ┌───────────┐                ┌────────────┐
///   │ ImageCube │ band-last      │ EndMember  │ name + provenance
///   └───────────┘                └────────────┘
///        │                              │
///        │                              ▼
///        │                      ┌────────────────┐
///        │                      │ EndMemberGroup │ packed n × k matrix
///        │                      └────────────────┘
///        ▼                              ▼
///   ┌────────────────────────────────────────┐
///   │ unmix                                  │
///   └────────────────────────────────────────┘
/// ```

pub mod endmember;
pub mod spectrum;
