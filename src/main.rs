fn main() -> anyhow::Result<()> {
    navpilot_lib::run()
}
