use heapalloc::{Allocator, Kernel};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    env_logger::init();

    let mut allocator = Allocator::new(Kernel::new());

    let addr1 = allocator.allocate(8).unwrap().as_ptr();
    log_alloc(addr1, 8);

    let addr2 = allocator.allocate(100).unwrap().as_ptr();
    log_alloc(addr2, 100);

    let addr3 = allocator.zero_allocate(4, 16).unwrap().as_ptr();
    log_alloc(addr3, 64);

    unsafe {
        allocator.release(addr1);
        allocator.release(addr2);

        // Fits in what addr1 and addr2 left behind once merged.
        let addr4 = allocator.allocate(120).unwrap().as_ptr();
        log_alloc(addr4, 120);
        println!("Reused addr1's block: {}", addr4 == addr1);

        let addr5 = allocator.resize(addr4, 16).unwrap().as_ptr();
        println!("Shrunk in place: {}", addr5 == addr4);

        allocator.release(addr5);
        allocator.release(addr3);
    }

    for extent in allocator.free_extents() {
        println!("free block at {:#x}: {} bytes", extent.addr, extent.size);
    }
    println!("{:?}", allocator.stats());
}
