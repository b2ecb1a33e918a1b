use crate::context::AppContext;
use anyhow::Result;
use log::info;
use std::path::Path;

pub fn run(app: &AppContext, output_path: &Path) -> Result<()> {
    info!(
        "Generating market data snapshot at {}",
        output_path.display()
    );

    let market_data = app.market_data()?;
    market_data.save_to_file(output_path)?;
    info!(
        "Market data snapshot with {} symbols successfully written to {}",
        market_data.symbols().len(),
        output_path.display()
    );

    Ok(())
}
