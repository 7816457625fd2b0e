// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! A simple example executable that manipulates pickle streams to demonstrate
//! the library's features.

use std::env;
use std::error::Error;
use std::fs::File;
use std::io::{stdin, stdout, Read};
use std::process::exit;

use serde_json as json;
use pickle_engine as pickle;

fn usage() -> ! {
    println!("Usage: pickle (decode | dis | transcode | to_json | from_json) [filename] [protocol]");
    println!("");
    println!("Input is either given file or stdin (use - for stdin with a protocol).");
    println!("decode:    decode and display pickle");
    println!("dis:       list the opcodes of a pickle");
    println!("transcode: decode and re-encode pickle");
    println!("to_json:   decode and jsonify pickle");
    println!("from_json: encode pickle from json");
    exit(1);
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = env::args().collect::<Vec<_>>();
    if args.len() < 2 {
        usage();
    }

    let mut reader: Box<dyn Read> = match args.get(2).map(|s| &**s) {
        None | Some("-") => Box::new(stdin()),
        Some(path) => Box::new(File::open(path)?),
    };
    let options = match args.get(3) {
        Some(proto) => pickle::SerOptions::new().proto(proto.parse()?),
        None => pickle::SerOptions::new(),
    };

    match &*args[1] {
        "decode" => {
            let decoded = pickle::value_from_reader(reader, Default::default())?;
            println!("{}", decoded);
        },
        "dis" => {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            let mut listing = String::new();
            let result = pickle::ops::dis(&data, &mut listing);
            print!("{}", listing);
            result?;
        },
        "transcode" => {
            let decoded = pickle::value_from_reader(reader, Default::default())?;
            pickle::value_to_writer(&mut stdout(), &decoded, options)?;
        },
        "to_json" => {
            let decoded: json::Value = pickle::from_reader(reader, Default::default())?;
            println!("{:#}", decoded);
        },
        "from_json" => {
            let decoded: json::Value = json::from_reader(reader)?;
            pickle::to_writer(&mut stdout(), &decoded, options)?;
        }
        _ => {
            println!("No such subcommand.");
            exit(1);
        }
    }
    Ok(())
}
