fn main() -> anyhow::Result<()> {
    account_reconcilor_lib::run()
}
