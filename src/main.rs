use lazyco::{Coroutine, Yielder};

fn main() {
    let mut test = Coroutine::new(|yielder: &Yielder<'_, String, i32>, first| {
        println!("put {first}");
        for i in 0..5 {
            println!("coroutine {i}");
            let put = yielder.suspend_with(i);
            println!("put {put}");
        }
    });

    while test.is_alive() {
        println!("main");
        match test.resume_with("42".to_string()) {
            Ok(ret) => println!("ret {ret}"),
            Err(err) => println!("{err}"),
        }
    }

    if let Err(err) = test.resume_with("43".to_string()) {
        println!("resumed after the end: {err}");
    }
}
