// Entity registries - one per domain noun
//
// Each entity resolves its free-text labels through Identity and stores
// itself in a FuzzyMap-backed registry, so every spelling a source uses
// lands on the same entry. Registries are per-run instances, passed by
// reference; there are no process-wide tables.

pub mod county;
pub mod precinct;
pub mod race;

pub use county::{County, CountyRegistry};
pub use precinct::{Precinct, PrecinctRegistry};
pub use race::{Race, RaceRegistry};
