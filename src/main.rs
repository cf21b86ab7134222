fn main() -> anyhow::Result<()> {
    sby_runner::run()
}
