fn main() {
    iropt::tool_main();
}
