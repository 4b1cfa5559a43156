fn main() {
    gyre::run();
}
