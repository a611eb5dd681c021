use log::{debug, info};

use crate::error::ConfigError;
use crate::hal::SecurityAttribution;
use crate::region::RegionTable;

/// Programs the table's attribution windows into consecutive unit regions and enables the
/// unit. Returns the number of windows written.
///
/// The unit stays disabled if any window is rejected, so the core keeps treating the whole
/// address space as secure.
pub fn configure_sau<S: SecurityAttribution>(
    sau: &mut S,
    table: &RegionTable,
) -> Result<usize, ConfigError> {
    for window in table.attribution {
        window.validate()?;
    }

    let available = sau.sau_region_count();
    if table.attribution.len() > available as usize {
        return Err(ConfigError::TooManySauRegions {
            count: table.attribution.len(),
            available,
        });
    }

    sau.sau_disable();

    for (number, window) in (0u8..).zip(table.attribution) {
        debug!(
            "SAU {} {} @ {:#010X}..={:#010X} {:?}",
            number, window.name, window.start, window.limit, window.attribute
        );
        sau.sau_set_region(number, window)
            .map_err(ConfigError::rejected("sau_set_region"))?;
    }

    sau.sau_enable();

    info!("{} attribution windows enabled", table.attribution.len());
    Ok(table.attribution.len())
}
