//! Built-in write methods, one per board family.

use super::registry::{Artifact, Blob, SendStage, WriteMethod, WriteMethodRegistration, WriteStage};

const SECTOR: u64 = 512;

const fn boot_file(dest: &'static str) -> WriteStage {
    WriteStage::Files {
        role: "uboot",
        source: Artifact::Build("u-boot.bin"),
        dest,
        partition: 1,
        target_is_directory: false,
    }
}

const fn raw(role: &'static str, source: Artifact, seek: u64) -> WriteStage {
    WriteStage::Image {
        role,
        source,
        seek,
        block_size: SECTOR,
        count: None,
    }
}

const UBOOT_SEND: SendStage = SendStage {
    role: "uboot",
    source: Some("u-boot.bin"),
    phase: None,
};

const KERNEL_IMG: &[WriteStage] = &[boot_file("/kernel.img")];
const RPI3: &[WriteStage] = &[boot_file("/rpi3-u-boot.bin")];
const RPI4: &[WriteStage] = &[boot_file("/u-boot.bin")];
const ROCKCHIP: &[WriteStage] = &[raw("uboot", Artifact::Build("u-boot-rockchip.bin"), 64)];
const AMLOGIC: &[WriteStage] = &[raw("image", Artifact::Build("image.bin"), 0)];
const SAMSUNG: &[WriteStage] = &[
    raw("bl1", Artifact::Blob(Blob::Bl1), 1),
    raw("bl2", Artifact::Blob(Blob::Bl2), 31),
    raw("tzsw", Artifact::Blob(Blob::Tzsw), 2111),
    raw("uboot", Artifact::Build("u-boot.bin"), 63),
];

inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "rpi0",
            description: "Raspberry Pi Zero: u-boot.bin as kernel.img on the boot partition",
            write: Some(KERNEL_IMG),
            send: None,
        },
    }
}

inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "rpi2",
            description: "Raspberry Pi 2: u-boot.bin as kernel.img on the boot partition",
            write: Some(KERNEL_IMG),
            send: None,
        },
    }
}

inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "rpi3",
            description: "Raspberry Pi 3: u-boot.bin as rpi3-u-boot.bin on the boot partition",
            write: Some(RPI3),
            send: None,
        },
    }
}

inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "rpi4",
            description: "Raspberry Pi 4: u-boot.bin on the boot partition",
            write: Some(RPI4),
            send: None,
        },
    }
}

inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "sunxi",
            description: "Allwinner: combined SPL image at 8 KiB, or FEL over USB",
            write: Some(&[WriteStage::Image {
                role: "uboot",
                source: Artifact::Build("u-boot-sunxi-with-spl.bin"),
                seek: 8,
                block_size: 1024,
                count: None,
            }]),
            send: Some(&[
                SendStage {
                    role: "spl",
                    source: Some("spl/sunxi-spl.bin"),
                    phase: Some("spl"),
                },
                UBOOT_SEND,
            ]),
        },
    }
}

inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "rockchip",
            description: "Rockchip: u-boot-rockchip.bin at sector 64",
            write: Some(ROCKCHIP),
            send: None,
        },
    }
}

inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "em100",
            description: "x86: u-boot.rom into the SPI flash emulator",
            write: Some(&[WriteStage::Emulator {
                role: "rom",
                source: Artifact::Build("u-boot.rom"),
            }]),
            send: None,
        },
    }
}

inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "zynq",
            description: "Xilinx Zynq: boot.bin then u-boot.img on the boot partition",
            write: Some(&[
                WriteStage::Files {
                    role: "spl",
                    source: Artifact::Build("spl/boot.bin"),
                    dest: "/",
                    partition: 1,
                    target_is_directory: true,
                },
                WriteStage::Files {
                    role: "uboot",
                    source: Artifact::Build("u-boot.img"),
                    dest: "/",
                    partition: 1,
                    target_is_directory: true,
                },
            ]),
            send: None,
        },
    }
}

inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "bbb",
            description: "BeagleBone Black: u-boot.img at 384 KiB then MLO at 128 KiB",
            write: Some(&[
                WriteStage::Image {
                    role: "uboot",
                    source: Artifact::Build("u-boot.img"),
                    seek: 1,
                    block_size: 384 << 10,
                    count: Some(4),
                },
                WriteStage::Image {
                    role: "mlo",
                    source: Artifact::Build("MLO"),
                    seek: 1,
                    block_size: 128 << 10,
                    count: Some(1),
                },
            ]),
            send: None,
        },
    }
}

inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "amlogic",
            description: "Amlogic: signed image.bin at the start of the device",
            write: Some(AMLOGIC),
            send: None,
        },
    }
}

// Does not work on XU3
inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "samsung",
            description: "Samsung Exynos: vendor bl1, bl2, tzsw then u-boot.bin",
            write: Some(SAMSUNG),
            send: Some(&[
                SendStage {
                    role: "bl1",
                    source: None,
                    phase: Some("bl1"),
                },
                SendStage {
                    role: "spl",
                    source: Some("spl/u-boot-spl.bin"),
                    phase: Some("spl"),
                },
                UBOOT_SEND,
            ]),
        },
    }
}

inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "tegra",
            description: "NVIDIA Tegra: u-boot-dtb-tegra.bin over USB recovery",
            write: None,
            send: Some(&[SendStage {
                role: "uboot",
                source: Some("u-boot-dtb-tegra.bin"),
                phase: None,
            }]),
        },
    }
}

inventory::submit! {
    WriteMethodRegistration {
        method: WriteMethod {
            name: "qemu",
            description: "QEMU: nothing to write, the emulator loads the build directly",
            write: Some(&[]),
            send: None,
        },
    }
}
