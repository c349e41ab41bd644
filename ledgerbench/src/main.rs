use anyhow::Result;

fn main() -> Result<()> {
    ledgerbench::cli::execute()
}
